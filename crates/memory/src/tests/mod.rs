//! End-to-end store tests.

mod recovery;
mod support;
