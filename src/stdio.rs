//! Ownership of the interpreter's own standard streams and of pipeline pipes.
//!
//! The parent's file descriptor 0 is the one piece of process-wide state that
//! pipeline execution may touch. [`SavedStdin`] holds a duplicate of it for the
//! duration of a pipeline and puts it back when dropped, on every exit path.

use log::{debug, error};
use nix::fcntl::OFlag;
use nix::libc::STDIN_FILENO;
use nix::unistd;
use std::io;
use std::os::fd::{AsFd, AsRawFd, OwnedFd};

/// An unnamed pipe connecting stage `i`'s output to stage `i + 1`'s input.
///
/// Both halves are close-on-exec, so a child only ever sees the half that was
/// explicitly installed as its standard input or output.
#[derive(Debug)]
pub struct PipelineLink {
    pub read: OwnedFd,
    pub write: OwnedFd,
}

impl PipelineLink {
    pub fn new() -> nix::Result<Self> {
        let (read, write) = unistd::pipe2(OFlag::O_CLOEXEC)?;
        debug!(
            "pipe created: read={} write={}",
            read.as_raw_fd(),
            write.as_raw_fd()
        );
        Ok(Self { read, write })
    }

    pub fn into_halves(self) -> (OwnedFd, OwnedFd) {
        (self.read, self.write)
    }
}

/// A duplicate of the interpreter's standard input, restored on drop.
pub struct SavedStdin {
    saved: OwnedFd,
    rewires: usize,
}

impl SavedStdin {
    /// Duplicate the current standard input descriptor.
    pub fn capture() -> io::Result<Self> {
        let saved = io::stdin().as_fd().try_clone_to_owned()?;
        debug!("saved stdin as fd {}", saved.as_raw_fd());
        Ok(Self { saved, rewires: 0 })
    }

    /// Make `fd` the interpreter's standard input until this guard is dropped.
    pub fn redirect_from(&mut self, fd: &OwnedFd) -> nix::Result<()> {
        unistd::dup2(fd.as_raw_fd(), STDIN_FILENO)?;
        self.rewires += 1;
        debug!("stdin rewired to fd {}", fd.as_raw_fd());
        Ok(())
    }

    /// Number of times standard input was rewired through this guard.
    pub fn rewires(&self) -> usize {
        self.rewires
    }

    fn restore(&self) -> nix::Result<()> {
        if self.rewires > 0 {
            unistd::dup2(self.saved.as_raw_fd(), STDIN_FILENO)?;
            debug!("stdin restored from fd {}", self.saved.as_raw_fd());
        }
        Ok(())
    }
}

impl Drop for SavedStdin {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            error!("failed to restore standard input: {}", e);
        }
    }
}
