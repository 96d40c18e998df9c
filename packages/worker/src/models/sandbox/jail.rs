//! Private root filesystem for the process backend.
//!
//! The parent lays out an empty skeleton on disk. Between `fork` and `exec`
//! the child enters fresh user, mount and network namespaces, bind-mounts the
//! configured system directories read-only and the workspace read-write over
//! that skeleton, then pivots into it. The old root is detached, so nothing
//! else of the host filesystem is reachable.

use std::ffi::{CStr, CString};
use std::fs;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::ptr;

use tempfile::TempDir;

use super::error::SandboxError;
use crate::config::NamespaceMode;

/// Where the workspace appears inside the jail.
pub const JAIL_WORKDIR: &str = "/box";

const DEVICES: &[&str] = &["/dev/null", "/dev/zero", "/dev/random", "/dev/urandom"];

/// Mount flags the kernel locks on mounts inherited from the host. A remount
/// that drops one of them fails with `EPERM`.
const LOCKED_FLAGS: &[(libc::c_ulong, libc::c_ulong)] = &[
    (libc::ST_NODEV, libc::MS_NODEV),
    (libc::ST_NOEXEC, libc::MS_NOEXEC),
    (libc::ST_NOATIME, libc::MS_NOATIME),
    (libc::ST_NODIRATIME, libc::MS_NODIRATIME),
    (libc::ST_RELATIME, libc::MS_RELATIME),
];

#[derive(Debug, Clone)]
struct Bind {
    source: CString,
    target: CString,
    readonly: bool,
}

impl Bind {
    fn new(source: &Path, target: &Path, readonly: bool) -> Result<Self, SandboxError> {
        Ok(Self {
            source: c_path(source)?,
            target: c_path(target)?,
            readonly,
        })
    }
}

/// Everything the child needs to confine itself, prepared before `fork` so
/// the child never allocates.
#[derive(Debug, Clone)]
pub struct MountPlan {
    mode: NamespaceMode,
    root: CString,
    workdir: CString,
    binds: Vec<Bind>,
}

/// Skeleton root on the host. Removed on drop, after the step has ended.
#[derive(Debug)]
pub struct Jail {
    _root: TempDir,
    plan: MountPlan,
}

impl Jail {
    /// Lay out mount points for `readonly_paths`, the device nodes and
    /// `workspace` under a fresh temporary root.
    pub fn prepare(
        mode: NamespaceMode,
        readonly_paths: &[PathBuf],
        workspace: &Path,
    ) -> Result<Self, SandboxError> {
        let root = tempfile::Builder::new().prefix("judge-root-").tempdir()?;
        let mut binds = Vec::new();

        for path in readonly_paths {
            let Ok(relative) = path.strip_prefix("/") else {
                return Err(SandboxError::Initialization(format!(
                    "read-only path {} is not absolute",
                    path.display()
                )));
            };
            if !path.is_dir() {
                continue;
            }
            let target = root.path().join(relative);
            fs::create_dir_all(&target)?;
            binds.push(Bind::new(path, &target, true)?);
        }

        fs::create_dir(root.path().join("dev"))?;
        for device in DEVICES.iter().map(Path::new).filter(|d| d.exists()) {
            let Ok(relative) = device.strip_prefix("/") else {
                continue;
            };
            let target = root.path().join(relative);
            fs::File::create(&target)?;
            binds.push(Bind::new(device, &target, false)?);
        }

        let workdir = root.path().join(JAIL_WORKDIR.trim_start_matches('/'));
        fs::create_dir(&workdir)?;
        binds.push(Bind::new(workspace, &workdir, false)?);

        let plan = MountPlan {
            mode,
            root: c_path(root.path())?,
            workdir: c_path(Path::new(JAIL_WORKDIR))?,
            binds,
        };
        Ok(Self { _root: root, plan })
    }

    pub fn plan(&self) -> MountPlan {
        self.plan.clone()
    }
}

impl MountPlan {
    /// Runs in the forked child. Under `BestEffort` a kernel that refuses the
    /// namespaces leaves the step unconfined.
    pub fn enter(&self) -> io::Result<()> {
        let flags = libc::CLONE_NEWUSER | libc::CLONE_NEWNS | libc::CLONE_NEWNET;
        if unsafe { libc::unshare(flags) } != 0 {
            let err = io::Error::last_os_error();
            return match self.mode {
                NamespaceMode::BestEffort => Ok(()),
                _ => Err(err),
            };
        }

        mount(None, c"/", libc::MS_REC | libc::MS_PRIVATE)?;
        mount(Some(&self.root), &self.root, libc::MS_BIND)?;
        for bind in &self.binds {
            mount(Some(&bind.source), &bind.target, libc::MS_BIND | libc::MS_REC)?;
            if bind.readonly {
                remount_readonly(&bind.target)?;
            }
        }

        check(unsafe { libc::chdir(self.root.as_ptr()) })?;
        let rc = unsafe { libc::syscall(libc::SYS_pivot_root, c".".as_ptr(), c".".as_ptr()) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        // The old root is stacked on top of the new one at "/".
        check(unsafe { libc::umount2(c".".as_ptr(), libc::MNT_DETACH) })?;
        check(unsafe { libc::chdir(c"/".as_ptr()) })?;
        remount_readonly(c"/")?;

        check(unsafe { libc::chdir(self.workdir.as_ptr()) })?;
        let (on, unused): (libc::c_ulong, libc::c_ulong) = (1, 0);
        check(unsafe { libc::prctl(libc::PR_SET_NO_NEW_PRIVS, on, unused, unused, unused) })
    }
}

fn mount(source: Option<&CStr>, target: &CStr, flags: libc::c_ulong) -> io::Result<()> {
    let source = source.map_or(ptr::null(), CStr::as_ptr);
    check(unsafe { libc::mount(source, target.as_ptr(), ptr::null(), flags, ptr::null()) })
}

fn remount_readonly(target: &CStr) -> io::Result<()> {
    // SAFETY: statvfs is plain old data.
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    check(unsafe { libc::statvfs(target.as_ptr(), &mut stat) })?;

    let mut flags = libc::MS_BIND | libc::MS_REMOUNT | libc::MS_RDONLY | libc::MS_NOSUID;
    for &(st_flag, ms_flag) in LOCKED_FLAGS {
        if stat.f_flag & st_flag != 0 {
            flags |= ms_flag;
        }
    }
    mount(None, target, flags)
}

fn check(rc: libc::c_int) -> io::Result<()> {
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

fn c_path(path: &Path) -> Result<CString, SandboxError> {
    CString::new(path.as_os_str().as_bytes()).map_err(|_| {
        SandboxError::Initialization(format!("path contains a NUL byte: {}", path.display()))
    })
}
