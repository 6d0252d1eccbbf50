// Copyright (c) 2019-2025 The Umbra Project developers

//! Errors surfaced by the crypto facade.

use displaydoc::Display;
use serde::{Deserialize, Serialize};

/// An error from a facade primitive.
#[derive(Clone, Copy, Debug, Display, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum Error {
    /// Input bytes do not encode a valid key, point or scalar
    InvalidInput,

    /// The ring signature did not validate
    InvalidSignature,
}

impl std::error::Error for Error {}
