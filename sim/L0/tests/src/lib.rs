//! Integration tests for the rigsim crates live under `integration/`.
