use std::io;

use thiserror::Error;

/// Errors raised while installing hooks or serving the relay pipes.
#[derive(Debug, Error)]
pub enum HookError {
    #[error("not a loadable image: {reason}")]
    NotAnImage { reason: &'static str },

    #[error("image has no import directory")]
    NoImportDirectory,

    #[error("could not change protection of import slot at {slot:#x} (os error {code})")]
    Protect { slot: usize, code: u32 },

    #[error("pipe {name}: {source}")]
    Pipe {
        name: String,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, HookError>;

impl HookError {
    pub(crate) fn pipe(name: impl Into<String>, source: io::Error) -> Self {
        Self::Pipe {
            name: name.into(),
            source,
        }
    }
}
