//! Network namespace handles and scoped entry.
//!
//! Linux binds the network namespace to a thread, not to the process, so
//! "run this in namespace X" has to manage thread affinity explicitly:
//!
//! - [`NetNs::create`] unshares on a short-lived helper thread, so the
//!   caller's thread never changes namespace while the new one is built.
//! - [`NetNs::enter`] moves the *calling thread* into the namespace and
//!   returns a guard that moves it back exactly once, on every exit path.
//!   The guard is `!Send`, so a region can never migrate to another thread,
//!   and regions on one handle are serialized by a per-handle lock.
//! - Child processes join the namespace through a pre-exec `setns`
//!   (see [`crate::command`]) and need no scoped region at all.

use std::fmt;
use std::fs::File;
use std::marker::PhantomData;
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::fs::MetadataExt;

use localnet_core::error::{LocalnetError, Result};
use nix::sched::{setns, unshare, CloneFlags};
use parking_lot::{ReentrantMutex, ReentrantMutexGuard, RwLock};

use crate::network::LinkSocket;
use crate::services::Service;

/// nsfs entry for the calling thread's network namespace.
const THREAD_NETNS: &str = "/proc/thread-self/ns/net";

/// Identity of a network namespace: device and inode of its nsfs entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NsId {
    pub dev: u64,
    pub ino: u64,
}

impl NsId {
    /// Namespace the calling thread is currently in.
    pub fn current() -> Result<Self> {
        let meta = std::fs::metadata(THREAD_NETNS)?;
        Ok(Self {
            dev: meta.dev(),
            ino: meta.ino(),
        })
    }

    fn of(file: &File) -> Result<Self> {
        let meta = file.metadata()?;
        Ok(Self {
            dev: meta.dev(),
            ino: meta.ino(),
        })
    }
}

impl fmt::Display for NsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "net:[{}]", self.ino)
    }
}

/// An open handle on one network namespace.
///
/// The namespace lives at least as long as the handle is open (or as long
/// as any process is still inside it).
#[derive(Debug)]
pub struct NetNs {
    file: RwLock<Option<File>>,
    scope: ReentrantMutex<()>,
    id: NsId,
}

impl NetNs {
    /// Allocate a fresh network namespace with its loopback interface up.
    pub fn create() -> Result<Self> {
        let worker = std::thread::Builder::new()
            .name("netns-create".to_string())
            .spawn(|| -> Result<File> {
                unshare(CloneFlags::CLONE_NEWNET).map_err(|e| {
                    LocalnetError::Resource(format!("unshare(CLONE_NEWNET) failed: {}", e))
                })?;
                let file = File::open(THREAD_NETNS)?;
                // A new namespace starts with lo down.
                LinkSocket::open()?.set_up("lo", true)?;
                Ok(file)
            })
            .map_err(|e| {
                LocalnetError::Resource(format!("failed to spawn namespace thread: {}", e))
            })?;

        let file = worker.join().map_err(|_| {
            LocalnetError::Resource("namespace creation thread panicked".to_string())
        })??;

        let ns = Self::from_file(file)?;
        tracing::info!(netns = %ns.id, "Created network namespace");
        Ok(ns)
    }

    /// Open a handle on the calling thread's current namespace.
    pub fn current() -> Result<Self> {
        Self::from_file(File::open(THREAD_NETNS)?)
    }

    fn from_file(file: File) -> Result<Self> {
        let id = NsId::of(&file)?;
        Ok(Self {
            file: RwLock::new(Some(file)),
            scope: ReentrantMutex::new(()),
            id,
        })
    }

    pub fn id(&self) -> NsId {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.file.read().is_none()
    }

    /// Move the calling thread into this namespace until the returned guard
    /// is dropped (or [`NsGuard::exit`] is called).
    ///
    /// Re-entering the same handle from inside its own region is allowed on
    /// the same thread; other threads block until the region ends.
    pub fn enter(&self) -> Result<NsGuard<'_>> {
        let scope = self.scope.lock();

        let file = self.file.read();
        let target = file.as_ref().ok_or(LocalnetError::NamespaceClosed)?;
        let original = File::open(THREAD_NETNS)?;

        setns(target.as_fd(), CloneFlags::CLONE_NEWNET).map_err(|e| {
            LocalnetError::Resource(format!("setns into {} failed: {}", self.id, e))
        })?;
        drop(file);

        tracing::trace!(netns = %self.id, "Entered network namespace");
        Ok(NsGuard {
            id: self.id,
            original: Some(original),
            _scope: scope,
            _not_send: PhantomData,
        })
    }

    /// Run `f` with the calling thread inside this namespace.
    ///
    /// The original namespace is restored before returning, whether `f`
    /// succeeded or not. If `f` failed its error wins over a restore error.
    pub fn run<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let guard = self.enter()?;
        let result = f();
        match (result, guard.exit()) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(restore)) => Err(restore),
            (Err(e), _) => Err(e),
        }
    }

    /// Borrow the namespace fd, holding off `close` for the duration.
    pub(crate) fn with_fd<T>(&self, f: impl FnOnce(BorrowedFd<'_>) -> Result<T>) -> Result<T> {
        let file = self.file.read();
        let file = file.as_ref().ok_or(LocalnetError::NamespaceClosed)?;
        f(file.as_fd())
    }

    /// Release the handle. Closing twice returns `NamespaceClosed`.
    pub fn close(&self) -> Result<()> {
        match self.file.write().take() {
            Some(file) => {
                drop(file);
                tracing::info!(netns = %self.id, "Closed network namespace");
                Ok(())
            }
            None => Err(LocalnetError::NamespaceClosed),
        }
    }
}

impl Service for NetNs {
    fn name(&self) -> &'static str {
        "netns"
    }

    fn destroy(&mut self) -> Result<()> {
        self.close()
    }
}

/// A scoped region inside a [`NetNs`]. Restores the thread's previous
/// namespace when dropped.
#[must_use = "the namespace is left as soon as the guard is dropped"]
pub struct NsGuard<'a> {
    id: NsId,
    original: Option<File>,
    _scope: ReentrantMutexGuard<'a, ()>,
    _not_send: PhantomData<*const ()>,
}

impl NsGuard<'_> {
    /// Leave the namespace, reporting a failed restore.
    pub fn exit(mut self) -> Result<()> {
        self.restore()
    }

    fn restore(&mut self) -> Result<()> {
        let Some(original) = self.original.take() else {
            return Ok(());
        };
        setns(original.as_fd(), CloneFlags::CLONE_NEWNET).map_err(|e| {
            LocalnetError::Resource(format!("setns back from {} failed: {}", self.id, e))
        })?;
        tracing::trace!(netns = %self.id, "Left network namespace");
        Ok(())
    }
}

impl Drop for NsGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            tracing::error!(netns = %self.id, error = %e, "Failed to restore network namespace");
        }
    }
}
