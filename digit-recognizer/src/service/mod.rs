//! Contains the recognition session and the interpretation of the model output.
//!
//! A [`Session`] is created with [`Session::new`], then loaded once with a [`ModelProvider`]
//! through [`Session::load`]. From then on every canvas snapshot can be recognized
//! with [`Session::recognize`].
//!
//! The lower level [`predict`] function runs a model on an already prepared grid,
//! if you want to do the preprocessing yourself.

mod interpreter;

pub use interpreter::*;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, info, warn};
use thiserror::Error;

use crate::{
    canvas::RawCanvasFrame,
    model::{Model, ModelLoadError, ModelProvider},
    prepare::{prepare, PrepareConfig},
};

#[derive(Error, Debug)]
pub enum RecognitionError {
    #[error("The model could not be loaded: {0}")]
    ModelLoad(#[from] ModelLoadError),
    #[error("No model is loaded")]
    ModelUnavailable,
    #[error("Invalid input shape: expected {expected:?}, found {actual:?}")]
    InvalidInputShape {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("Nothing has been drawn on the canvas")]
    EmptyInputRejected,
    #[error("The model failed while running: {0}")]
    InferenceRuntime(String),
    #[error("A request is already in progress")]
    Busy,
}

/// The lifecycle of a [`Session`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Loading,
    Ready,
    Predicting,
    /// The last load failed, with its message.
    Error(String),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SessionConfig {
    pub prepare: PrepareConfig,
    pub postprocessing: Postprocessing,
}

struct Inner<M> {
    state: SessionState,
    model: Option<Arc<M>>,
}

/// Owns the model and serializes the recognition requests.
///
/// One request runs at a time: a request made while another one is in progress
/// fails with [`RecognitionError::Busy`] instead of waiting.
pub struct Session<M: Model> {
    config: SessionConfig,
    inner: Mutex<Inner<M>>,
}

/// Puts the session back to `Ready` when a prediction ends, whatever its outcome.
struct PredictingGuard<'a, M> {
    inner: &'a Mutex<Inner<M>>,
}

impl<M> Drop for PredictingGuard<'_, M> {
    fn drop(&mut self) {
        let mut inner = lock(self.inner);
        if inner.state == SessionState::Predicting {
            inner.state = SessionState::Ready;
        }
    }
}

fn lock<M>(inner: &Mutex<Inner<M>>) -> MutexGuard<'_, Inner<M>> {
    // the state is always left consistent, a panicking holder does not corrupt it
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<M: Model> Session<M> {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: SessionState::Idle,
                model: None,
            }),
        }
    }

    pub fn current_config(&self) -> SessionConfig {
        self.config
    }

    pub fn state(&self) -> SessionState {
        lock(&self.inner).state.clone()
    }

    /// The shared model, once loaded.
    pub fn model_handle(&self) -> Option<Arc<M>> {
        lock(&self.inner).model.clone()
    }

    /// Acquires the model from the provider.
    ///
    /// Only an `Idle` session, or one whose previous load failed, can load.
    pub fn load<P>(&self, provider: &P) -> Result<Arc<M>, RecognitionError>
    where
        P: ModelProvider<Model = M>,
    {
        {
            let mut inner = lock(&self.inner);
            match inner.state {
                SessionState::Idle | SessionState::Error(_) => inner.state = SessionState::Loading,
                _ => return Err(RecognitionError::Busy),
            }
        }
        debug!("Session state: Loading");

        // the lock is not held while the provider works
        let result = provider.acquire();

        let mut inner = lock(&self.inner);
        match result {
            Ok(model) => {
                let model = Arc::new(model);
                inner.model = Some(Arc::clone(&model));
                inner.state = SessionState::Ready;
                info!("Session state: Ready");
                Ok(model)
            }
            Err(e) => {
                warn!("Session state: Error ({})", e);
                inner.state = SessionState::Error(e.to_string());
                Err(e)
            }
        }
    }

    /// Recognizes the digit drawn on the canvas.
    pub fn recognize(&self, frame: &RawCanvasFrame) -> Result<Prediction, RecognitionError> {
        let (model, _guard) = {
            let mut inner = lock(&self.inner);
            match inner.state {
                SessionState::Ready => {}
                SessionState::Predicting | SessionState::Loading => {
                    return Err(RecognitionError::Busy)
                }
                SessionState::Idle | SessionState::Error(_) => {
                    return Err(RecognitionError::ModelUnavailable)
                }
            }
            let model = inner
                .model
                .clone()
                .ok_or(RecognitionError::ModelUnavailable)?;
            if frame.is_blank() {
                return Err(RecognitionError::EmptyInputRejected);
            }
            inner.state = SessionState::Predicting;
            (
                model,
                PredictingGuard {
                    inner: &self.inner,
                },
            )
        };

        let grid = prepare(frame, &self.config.prepare)?;
        predict(model.as_ref(), &grid, self.config.postprocessing)
    }
}
