//! Integration test driver for the `tests/integration/` submodules.
//!
//! Each `mod` below maps to a file that exercises one subsystem against
//! the recording [`mock_hw::MockBoard`].  All tests run on the host with
//! the `embassy-time` std driver; no hardware is required.

mod action_tests;
mod mock_hw;
