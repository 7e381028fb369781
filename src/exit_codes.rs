//! Process exit codes of the `fwbuild` binary.
//!
//! A failed compile is reported separately from a broken build system so that
//! callers can tell "fix your code" apart from "retry later". Invalid
//! command-line usage exits with clap's own code, 2.

/// The command succeeded.
pub const SUCCESS: u8 = 0;

/// An infrastructure error: bad input, git, filesystem, container backend.
pub const ERROR: u8 = 1;

/// The build ran but the firmware did not compile.
pub const BUILD_FAILED: u8 = 3;
