use digit_recognizer::{
    canvas::RawCanvasFrame,
    prepare::{batch_prepare, prepare, ChannelReduction, Polarity, PrepareConfig, GRID_SIDE},
    service::RecognitionError,
};

mod common;
use common::canvas_with_square;

#[test]
fn output_has_fixed_shape_and_range() {
    let frame = canvas_with_square(100, 120, 37);
    let grid = prepare(&frame, &PrepareConfig::default()).unwrap();
    assert_eq!(grid.as_array().shape(), &[1, 28, 28, 1]);
    assert!(grid
        .as_array()
        .iter()
        .all(|v| (0.0..=1.0).contains(v)));
}

#[test]
fn inked_block_is_brighter_than_background() {
    // a 10x10 block on a 280x280 canvas covers exactly the grid cell (5, 8)
    let frame = canvas_with_square(50, 80, 10);
    let grid = prepare(&frame, &PrepareConfig::default()).unwrap();

    let inked = grid.cell(5, 8);
    assert!((inked - 1.0).abs() < 1e-6);
    for y in 0..GRID_SIDE {
        for x in 0..GRID_SIDE {
            if (x, y) != (5, 8) {
                assert!(grid.cell(x, y) < inked);
                assert_eq!(grid.cell(x, y), 0.0);
            }
        }
    }
}

#[test]
fn unaligned_block_is_spread_by_area() {
    // half of the block falls in cell 5, half in cell 6
    let frame = canvas_with_square(55, 80, 10);
    let grid = prepare(&frame, &PrepareConfig::default()).unwrap();
    assert!((grid.cell(5, 8) - 0.5).abs() < 1e-6);
    assert!((grid.cell(6, 8) - 0.5).abs() < 1e-6);
}

#[test]
fn all_zero_frame_gives_uniform_grid() {
    let frame = RawCanvasFrame::new(280, 280, vec![0; 280 * 280 * 4]).unwrap();
    let grid = prepare(&frame, &PrepareConfig::default()).unwrap();
    assert!(grid.as_array().iter().all(|v| *v == 0.0));

    let inverted = PrepareConfig {
        polarity: Polarity::InkIsDark,
        ..Default::default()
    };
    // a transparent canvas is white under dark ink, so it is background too
    let grid = prepare(&frame, &inverted).unwrap();
    assert!(grid.as_array().iter().all(|v| v.abs() < 1e-6));
}

#[test]
fn dark_ink_on_transparent_canvas_is_kept() {
    let mut image = image::RgbaImage::from_pixel(280, 280, image::Rgba([0, 0, 0, 0]));
    for y in 0..10 {
        for x in 0..10 {
            image.put_pixel(x, y, image::Rgba([0, 0, 0, 255]));
        }
    }
    let frame = RawCanvasFrame::from(image);
    let config = PrepareConfig {
        polarity: Polarity::InkIsDark,
        ..Default::default()
    };
    let grid = prepare(&frame, &config).unwrap();
    assert!(grid.cell(0, 0) > grid.cell(10, 10));
    assert!((grid.cell(0, 0) - 1.0).abs() < 1e-6);
    assert!(grid.cell(10, 10).abs() < 1e-6);

    // opacity is ink whatever the polarity
    let alpha = PrepareConfig {
        reduction: ChannelReduction::Alpha,
        polarity: Polarity::InkIsDark,
    };
    let grid = prepare(&frame, &alpha).unwrap();
    assert_eq!(grid.cell(0, 0), 1.0);
    assert_eq!(grid.cell(10, 10), 0.0);
}

#[test]
fn dark_ink_is_inverted() {
    let mut image = image::RgbaImage::from_pixel(280, 280, image::Rgba([255, 255, 255, 255]));
    for y in 0..10 {
        for x in 0..10 {
            image.put_pixel(x, y, image::Rgba([0, 0, 0, 255]));
        }
    }
    let frame = RawCanvasFrame::from(image);
    let config = PrepareConfig {
        polarity: Polarity::InkIsDark,
        ..Default::default()
    };
    let grid = prepare(&frame, &config).unwrap();
    assert!((grid.cell(0, 0) - 1.0).abs() < 1e-6);
    assert!(grid.cell(1, 0).abs() < 1e-6);
}

#[test]
fn alpha_reduction_reads_opacity() {
    // transparent canvas with half opaque black ink
    let mut image = image::RgbaImage::from_pixel(28, 28, image::Rgba([0, 0, 0, 0]));
    image.put_pixel(3, 4, image::Rgba([0, 0, 0, 255]));
    let frame = RawCanvasFrame::from(image);

    let config = PrepareConfig {
        reduction: ChannelReduction::Alpha,
        ..Default::default()
    };
    let grid = prepare(&frame, &config).unwrap();
    assert_eq!(grid.cell(3, 4), 1.0);
    assert_eq!(grid.cell(4, 3), 0.0);

    // luminance sees black ink on a transparent canvas as background
    let grid = prepare(&frame, &PrepareConfig::default()).unwrap();
    assert_eq!(grid.cell(3, 4), 0.0);
}

#[test]
fn preprocessing_is_deterministic() {
    let frame = canvas_with_square(33, 71, 57);
    let config = PrepareConfig::default();
    let first = prepare(&frame, &config).unwrap();
    let second = prepare(&frame, &config).unwrap();
    let first_bits = first.as_array().iter().map(|v| v.to_bits()).collect::<Vec<_>>();
    let second_bits = second.as_array().iter().map(|v| v.to_bits()).collect::<Vec<_>>();
    assert_eq!(first_bits, second_bits);
}

#[test]
fn non_square_frame_is_rejected() {
    let frame = RawCanvasFrame::filled(280, 200, [0, 0, 0, 255]);
    assert!(matches!(
        prepare(&frame, &PrepareConfig::default()),
        Err(RecognitionError::InvalidInputShape { .. })
    ));
}

#[test]
fn non_integer_ratio_is_supported() {
    let frame = RawCanvasFrame::filled(300, 300, [255, 255, 255, 255]);
    let grid = prepare(&frame, &PrepareConfig::default()).unwrap();
    assert!(grid.as_array().iter().all(|v| (v - 1.0).abs() < 1e-5));
}

#[test]
fn batch_matches_single_preparation() {
    let frames = vec![canvas_with_square(0, 0, 100), canvas_with_square(150, 150, 60)];
    let config = PrepareConfig::default();
    let batch = batch_prepare(&frames, &config).unwrap();
    assert_eq!(batch.shape(), &[2, 28, 28, 1]);

    for (i, frame) in frames.iter().enumerate() {
        let single = prepare(frame, &config).unwrap();
        assert_eq!(
            batch.index_axis(ndarray::Axis(0), i),
            single.as_array().index_axis(ndarray::Axis(0), 0)
        );
    }
}
