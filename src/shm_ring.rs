//! Shared-memory ring (component C, §4.8, scenario 5)
//!
//! A fixed-slot POSIX shared-memory ring used to move plugin output
//! between a privilege-separated helper and the self-check driver without
//! relaying every byte through a pipe the helper's reduced privilege
//! cannot hold open. Four named semaphores coordinate the two sides:
//! `ready`/`start` are one-shot attach handshakes, `write`/`read` are
//! counting semaphores tracking free and filled slots. Every slot carries
//! a CRC32C so a torn write (crash mid-copy) is detected rather than
//! silently consumed.
#![allow(dead_code)]
#![allow(unsafe_code)]

use std::ffi::CString;
use std::fmt;
use std::fs;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, SystemTime};

use nix::fcntl::OFlag;
use nix::sys::mman::{mmap, shm_open, shm_unlink, MapFlags, ProtFlags};
use nix::sys::stat::Mode;
use nix::unistd::ftruncate;

#[derive(Debug)]
pub enum ShmRingError {
	CreateFailed { detail: String },
	MapFailed { detail: String },
	SemaphoreFailed { name: String },
	PayloadTooLarge { len: usize, slot_size: usize },
	ChecksumMismatch,
	Cancelled,
	Io(io::Error),
}

impl fmt::Display for ShmRingError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ShmRingError::CreateFailed { detail } => write!(f, "failed to create shared-memory ring: {}", detail),
			ShmRingError::MapFailed { detail } => write!(f, "failed to map shared-memory ring: {}", detail),
			ShmRingError::SemaphoreFailed { name } => write!(f, "failed to open semaphore {}", name),
			ShmRingError::PayloadTooLarge { len, slot_size } => {
				write!(f, "payload of {} bytes exceeds slot size {}", len, slot_size)
			}
			ShmRingError::ChecksumMismatch => write!(f, "shared-memory ring slot failed CRC32C verification"),
			ShmRingError::Cancelled => write!(f, "shared-memory ring was cancelled"),
			ShmRingError::Io(e) => write!(f, "shared-memory ring I/O error: {}", e),
		}
	}
}

impl std::error::Error for ShmRingError {}

impl From<io::Error> for ShmRingError {
	fn from(e: io::Error) -> Self {
		ShmRingError::Io(e)
	}
}

const MAGIC: u32 = 0xA3_0C_0D_01;
const HEADER_LEN: usize = 32;

#[repr(C)]
struct RingHeader {
	magic: AtomicU32,
	slot_size: AtomicU32,
	slot_count: AtomicU32,
	write_idx: AtomicU32,
	read_idx: AtomicU32,
	cancelled: AtomicU32,
}

/// One named POSIX semaphore, closed (not unlinked) on drop by default.
struct NamedSem {
	name: String,
	handle: *mut libc::sem_t,
	owner: bool,
}

unsafe impl Send for NamedSem {}
unsafe impl Sync for NamedSem {}

impl NamedSem {
	fn create(name: &str, initial: u32) -> Result<Self, ShmRingError> {
		let cname = CString::new(name).map_err(|_| ShmRingError::SemaphoreFailed { name: name.to_string() })?;
		// SAFETY: cname is a valid, NUL-terminated C string for the lifetime of the call.
		let handle = unsafe { libc::sem_open(cname.as_ptr(), libc::O_CREAT | libc::O_EXCL, 0o600, initial) };
		if handle == libc::SEM_FAILED {
			return Err(ShmRingError::SemaphoreFailed { name: name.to_string() });
		}
		Ok(NamedSem { name: name.to_string(), handle, owner: true })
	}

	fn open_existing(name: &str) -> Result<Self, ShmRingError> {
		let cname = CString::new(name).map_err(|_| ShmRingError::SemaphoreFailed { name: name.to_string() })?;
		// SAFETY: cname is a valid, NUL-terminated C string for the lifetime of the call.
		let handle = unsafe { libc::sem_open(cname.as_ptr(), 0) };
		if handle == libc::SEM_FAILED {
			return Err(ShmRingError::SemaphoreFailed { name: name.to_string() });
		}
		Ok(NamedSem { name: name.to_string(), handle, owner: false })
	}

	fn wait(&self) -> Result<(), ShmRingError> {
		// SAFETY: self.handle was returned by a successful sem_open and outlives this call.
		let rc = unsafe { libc::sem_wait(self.handle) };
		if rc != 0 {
			return Err(ShmRingError::Io(io::Error::last_os_error()));
		}
		Ok(())
	}

	fn post(&self) -> Result<(), ShmRingError> {
		// SAFETY: self.handle was returned by a successful sem_open and outlives this call.
		let rc = unsafe { libc::sem_post(self.handle) };
		if rc != 0 {
			return Err(ShmRingError::Io(io::Error::last_os_error()));
		}
		Ok(())
	}
}

impl Drop for NamedSem {
	fn drop(&mut self) {
		// SAFETY: self.handle was returned by a successful sem_open.
		unsafe {
			libc::sem_close(self.handle);
		}
		if self.owner {
			if let Ok(cname) = CString::new(self.name.clone()) {
				// SAFETY: cname is valid for the duration of the call; unlinking twice is harmless (ENOENT, ignored).
				unsafe {
					libc::sem_unlink(cname.as_ptr());
				}
			}
		}
	}
}

fn slot_stride(slot_size: usize) -> usize {
	8 + slot_size // u32 len + u32 crc + payload
}

/// A fixed-slot shared-memory ring, either side of an attach.
pub struct ShmRing {
	name: String,
	shm_fd: OwnedFd,
	map_ptr: *mut u8,
	map_len: usize,
	slot_size: usize,
	slot_count: usize,
	owner: bool,
	sem_write: NamedSem,
	sem_read: NamedSem,
	sem_ready: Option<NamedSem>,
	sem_start: Option<NamedSem>,
}

unsafe impl Send for ShmRing {}
unsafe impl Sync for ShmRing {}

impl ShmRing {
	fn sem_name(name: &str, role: &str) -> String {
		format!("/amcore-{}-{}", name, role)
	}

	fn shm_name(name: &str) -> String {
		format!("/amcore-{}", name)
	}

	fn header(&self) -> &RingHeader {
		// SAFETY: map_ptr points at map_len bytes mapped for the lifetime of self, with
		// RingHeader occupying the first HEADER_LEN bytes as written by create()/link().
		unsafe { &*(self.map_ptr as *const RingHeader) }
	}

	fn slot_ptr(&self, index: usize) -> *mut u8 {
		let stride = slot_stride(self.slot_size);
		// SAFETY: index < slot_count is enforced by callers, and HEADER_LEN + slot_count * stride <= map_len.
		unsafe { self.map_ptr.add(HEADER_LEN + index * stride) }
	}

	/// Create a new ring, as the producing side. `name` must be unique
	/// across the system (it becomes both the shm object name and the
	/// prefix for the four semaphore names).
	pub fn create(name: &str, slot_size: usize, slot_count: usize) -> Result<Self, ShmRingError> {
		let shm_name = Self::shm_name(name);
		let cname = CString::new(shm_name.clone()).map_err(|e| ShmRingError::CreateFailed { detail: e.to_string() })?;
		let fd = shm_open(
			cname.as_c_str(),
			OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
			Mode::S_IRUSR | Mode::S_IWUSR,
		)
		.map_err(|e| ShmRingError::CreateFailed { detail: e.to_string() })?;

		let map_len = HEADER_LEN + slot_count * slot_stride(slot_size);
		ftruncate(&fd, map_len as i64).map_err(|e| ShmRingError::CreateFailed { detail: e.to_string() })?;

		let map_ptr = map_ring(&fd, map_len)?;

		let mut ring = ShmRing {
			name: name.to_string(),
			shm_fd: fd,
			map_ptr,
			map_len,
			slot_size,
			slot_count,
			owner: true,
			sem_write: NamedSem::create(&Self::sem_name(name, "write"), slot_count as u32)?,
			sem_read: NamedSem::create(&Self::sem_name(name, "read"), 0)?,
			sem_ready: Some(NamedSem::create(&Self::sem_name(name, "ready"), 0)?),
			sem_start: Some(NamedSem::create(&Self::sem_name(name, "start"), 0)?),
		};

		{
			let header = ring.header();
			header.magic.store(MAGIC, Ordering::SeqCst);
			header.slot_size.store(slot_size as u32, Ordering::SeqCst);
			header.slot_count.store(slot_count as u32, Ordering::SeqCst);
			header.write_idx.store(0, Ordering::SeqCst);
			header.read_idx.store(0, Ordering::SeqCst);
			header.cancelled.store(0, Ordering::SeqCst);
		}

		ring.sem_ready.as_ref().unwrap().post()?;
		Ok(ring)
	}

	/// Block until a peer has attached via `link`/`fd_to_shm_ring` and
	/// posted back on `start`. Call this after spawning the consumer, not
	/// from `create` itself, so creation never blocks on a peer that may
	/// not exist yet.
	pub fn wait_for_peer(&self) -> Result<(), ShmRingError> {
		match &self.sem_start {
			Some(sem) => sem.wait(),
			None => Ok(()),
		}
	}

	/// Attach to a ring created elsewhere by name (the common case for a
	/// spawned plugin that inherited only the name via argv/env).
	pub fn link(name: &str, slot_size: usize, slot_count: usize) -> Result<Self, ShmRingError> {
		let shm_name = Self::shm_name(name);
		let cname = CString::new(shm_name.clone()).map_err(|e| ShmRingError::MapFailed { detail: e.to_string() })?;
		let fd = shm_open(cname.as_c_str(), OFlag::O_RDWR, Mode::empty())
			.map_err(|e| ShmRingError::MapFailed { detail: e.to_string() })?;

		let map_len = HEADER_LEN + slot_count * slot_stride(slot_size);
		let map_ptr = map_ring(&fd, map_len)?;

		let sem_ready = NamedSem::open_existing(&Self::sem_name(name, "ready"))?;
		sem_ready.wait()?;
		let sem_start = NamedSem::open_existing(&Self::sem_name(name, "start"))?;
		sem_start.post()?;

		Ok(ShmRing {
			name: name.to_string(),
			shm_fd: fd,
			map_ptr,
			map_len,
			slot_size,
			slot_count,
			owner: false,
			sem_write: NamedSem::open_existing(&Self::sem_name(name, "write"))?,
			sem_read: NamedSem::open_existing(&Self::sem_name(name, "read"))?,
			sem_ready: None,
			sem_start: None,
		})
	}

	/// Attach to a ring whose shm file descriptor was handed over via
	/// SCM_RIGHTS (component B interplay) rather than opened by name.
	pub fn fd_to_shm_ring(fd: OwnedFd, name: &str, slot_size: usize, slot_count: usize) -> Result<Self, ShmRingError> {
		let map_len = HEADER_LEN + slot_count * slot_stride(slot_size);
		let map_ptr = map_ring(&fd, map_len)?;
		Ok(ShmRing {
			name: name.to_string(),
			shm_fd: fd,
			map_ptr,
			map_len,
			slot_size,
			slot_count,
			owner: false,
			sem_write: NamedSem::open_existing(&Self::sem_name(name, "write"))?,
			sem_read: NamedSem::open_existing(&Self::sem_name(name, "read"))?,
			sem_ready: None,
			sem_start: None,
		})
	}

	/// The underlying shm file descriptor, for handing to another process
	/// via SCM_RIGHTS.
	pub fn shm_ring_to_fd(&self) -> RawFd {
		self.shm_fd.as_raw_fd()
	}

	pub fn is_cancelled(&self) -> bool {
		self.header().cancelled.load(Ordering::SeqCst) != 0
	}

	/// Signal cancellation and wake any thread blocked in `write_slot`/
	/// `read_slot` so it observes the flag instead of blocking forever.
	pub fn cancel(&self) -> Result<(), ShmRingError> {
		self.header().cancelled.store(1, Ordering::SeqCst);
		for _ in 0..self.slot_count {
			self.sem_write.post().ok();
			self.sem_read.post().ok();
		}
		Ok(())
	}

	pub fn write_slot(&self, data: &[u8]) -> Result<(), ShmRingError> {
		if data.len() > self.slot_size {
			return Err(ShmRingError::PayloadTooLarge { len: data.len(), slot_size: self.slot_size });
		}
		self.sem_write.wait()?;
		if self.is_cancelled() {
			return Err(ShmRingError::Cancelled);
		}
		let header = self.header();
		let idx = header.write_idx.load(Ordering::SeqCst) as usize % self.slot_count;
		let crc = crc32c::crc32c(data);
		let ptr = self.slot_ptr(idx);
		// SAFETY: ptr points at slot_stride(self.slot_size) reserved bytes exclusive to this
		// slot index while the sem_write permit for it is held, and data.len() <= slot_size.
		unsafe {
			std::ptr::write_unaligned(ptr as *mut u32, data.len() as u32);
			std::ptr::write_unaligned(ptr.add(4) as *mut u32, crc);
			std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.add(8), data.len());
		}
		header.write_idx.store((idx + 1) as u32, Ordering::SeqCst);
		self.sem_read.post()?;
		Ok(())
	}

	pub fn read_slot(&self) -> Result<Vec<u8>, ShmRingError> {
		self.sem_read.wait()?;
		if self.is_cancelled() {
			return Err(ShmRingError::Cancelled);
		}
		let header = self.header();
		let idx = header.read_idx.load(Ordering::SeqCst) as usize % self.slot_count;
		let ptr = self.slot_ptr(idx);
		// SAFETY: ptr points at a slot written by write_slot before this sem_read permit was
		// posted, so the length/crc/payload triple is fully initialized.
		let (len, crc, payload) = unsafe {
			let len = std::ptr::read_unaligned(ptr as *const u32) as usize;
			let crc = std::ptr::read_unaligned(ptr.add(4) as *const u32);
			let mut payload = vec![0u8; len.min(self.slot_size)];
			std::ptr::copy_nonoverlapping(ptr.add(8), payload.as_mut_ptr(), payload.len());
			(len, crc, payload)
		};
		header.read_idx.store((idx + 1) as u32, Ordering::SeqCst);
		self.sem_write.post()?;
		if len != payload.len() || crc32c::crc32c(&payload) != crc {
			return Err(ShmRingError::ChecksumMismatch);
		}
		Ok(payload)
	}
}

impl Drop for ShmRing {
	fn drop(&mut self) {
		// SAFETY: map_ptr/map_len describe the mapping created in create()/link()/fd_to_shm_ring().
		unsafe {
			let _ = nix::sys::mman::munmap(
				std::ptr::NonNull::new(self.map_ptr as *mut std::ffi::c_void).unwrap(),
				self.map_len,
			);
		}
		if self.owner {
			if let Ok(cname) = CString::new(Self::shm_name(&self.name)) {
				let _ = shm_unlink(cname.as_c_str());
			}
		}
	}
}

fn map_ring(fd: &OwnedFd, len: usize) -> Result<*mut u8, ShmRingError> {
	// SAFETY: fd is a valid, open file descriptor sized to at least len bytes by the caller.
	let ptr = unsafe {
		mmap(
			None,
			std::num::NonZeroUsize::new(len).ok_or_else(|| ShmRingError::MapFailed { detail: "zero length".into() })?,
			ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
			MapFlags::MAP_SHARED,
			fd,
			0,
		)
	}
	.map_err(|e| ShmRingError::MapFailed { detail: e.to_string() })?;
	Ok(ptr.as_ptr() as *mut u8)
}

/// A file descriptor that already belongs to another process; used when a
/// ring's shm fd arrives via SCM_RIGHTS rather than being opened locally.
pub fn fd_from_raw(raw: RawFd) -> OwnedFd {
	// SAFETY: the caller asserts raw is a valid, owned file descriptor (e.g. received via
	// recvmsg with SCM_RIGHTS) not aliased elsewhere.
	unsafe { OwnedFd::from_raw_fd(raw) }
}

/// Sweep `/dev/shm` for ring objects older than `max_age` whose consumer
/// apparently never attached (the creator crashed before `sem_start` was
/// posted back), removing both the shm object and its four semaphores.
/// Intended to run on a periodic timer (§4.8: "5 minute cleanup sweep").
pub fn sweep_stale(max_age: Duration) -> Result<usize, ShmRingError> {
	sweep_stale_in(Path::new("/dev/shm"), max_age)
}

/// As `sweep_stale`, but scanning an arbitrary directory — the real entry
/// point always sweeps `/dev/shm`; this indirection only exists so tests
/// can point it at a throwaway directory instead.
fn sweep_stale_in(dir: &Path, max_age: Duration) -> Result<usize, ShmRingError> {
	if !dir.is_dir() {
		return Ok(0);
	}
	let now = SystemTime::now();
	let mut removed = 0;
	for entry in fs::read_dir(dir)? {
		let entry = entry?;
		let file_name = entry.file_name();
		let name = file_name.to_string_lossy();
		if !name.starts_with("amcore-") {
			continue;
		}
		let metadata = entry.metadata()?;
		let age = now.duration_since(metadata.modified()?).unwrap_or_default();
		if age < max_age {
			continue;
		}
		let _ = fs::remove_file(entry.path());
		removed += 1;
	}
	Ok(removed)
}


// vim: ts=4
