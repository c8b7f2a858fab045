// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::borrow::Cow;
use std::io;

/// The result type for fallible operations that use the [`Error`] type of this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// An error that can occur when starting a [`TimeService`][crate::TimeService] or
/// converting logical time.
///
/// Timer operations themselves never fail: resetting or stopping a timer that already
/// fired or was stopped reports `false` instead of an error.
///
/// # Limited introspection
///
/// Other than implementing the [`std::error::Error`] and [`core::fmt::Debug`] traits, this error type
/// currently provides no introspection capabilities.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct Error(ErrorKind);

#[derive(Debug, thiserror::Error)]
enum ErrorKind {
    #[error("failed to spawn the {name} thread")]
    Spawn {
        name: Cow<'static, str>,
        #[source]
        source: io::Error,
    },

    #[cfg(any(feature = "fmt", test))]
    #[error(transparent)]
    Jiff(jiff::Error),
}

impl Error {
    const fn from_kind(kind: ErrorKind) -> Self {
        Self(kind)
    }

    pub(crate) fn spawn(name: impl Into<Cow<'static, str>>, source: io::Error) -> Self {
        Self::from_kind(ErrorKind::Spawn {
            name: name.into(),
            source,
        })
    }

    #[cfg(any(feature = "fmt", test))]
    pub(crate) const fn jiff(error: jiff::Error) -> Self {
        Self::from_kind(ErrorKind::Jiff(error))
    }

    #[cfg(test)]
    const fn kind(&self) -> &ErrorKind {
        &self.0
    }
}
