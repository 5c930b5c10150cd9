// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::fmt;
use std::io;

#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    Dm(devicemapper::DmError),
    Nix(nix::Error),
    /// A `pre_create` edge names a layer that was never inserted into the index.
    MissingDependency(String),
    /// `mark_dependants` found a layer reachable from itself.
    CircularDependency(String),
    /// A formatted target parameter string exceeded what the kernel will accept.
    OutOfSpace(String),
    /// The mapper device directory could not be scanned.
    ScanFailure(io::Error),
    /// A snapshot's cow LV is itself a snapshot, or an origin with active
    /// snapshots of its own. Recursive snapshots are not supported.
    UnsupportedRecursiveSnapshot(String),
    /// The on-disk or in-memory metadata is structurally invalid.
    Metadata(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Dm(e) => write!(f, "device-mapper error: {}", e),
            Error::Nix(e) => write!(f, "system call error: {}", e),
            Error::MissingDependency(name) => {
                write!(f, "layer {} has no corresponding node in the index", name)
            }
            Error::CircularDependency(name) => {
                write!(f, "circular dependency detected at layer {}", name)
            }
            Error::OutOfSpace(name) => write!(f, "target parameters for {} too large", name),
            Error::ScanFailure(e) => write!(f, "could not scan device-mapper directory: {}", e),
            Error::UnsupportedRecursiveSnapshot(name) => {
                write!(f, "recursive snapshots are not supported (at {})", name)
            }
            Error::Metadata(msg) => write!(f, "metadata error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Io(err)
    }
}

impl From<devicemapper::DmError> for Error {
    fn from(err: devicemapper::DmError) -> Error {
        Error::Dm(err)
    }
}

impl From<nix::Error> for Error {
    fn from(err: nix::Error) -> Error {
        Error::Nix(err)
    }
}
