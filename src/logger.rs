// Copyright (C) 2023, Ava Labs, Inc. All rights reserved.
// See the file LICENSE.md for licensing terms.

// Supports making the log crate optional.

#[cfg(feature = "logger")]
pub use log::{debug, trace, warn};

#[cfg(not(feature = "logger"))]
mod noop {
    macro_rules! noop {
        ($($arg:tt)*) => {};
    }
    pub(crate) use noop as debug;
    pub(crate) use noop as trace;
    pub(crate) use noop as warn;
}

#[cfg(not(feature = "logger"))]
pub(crate) use noop::{debug, trace, warn};
