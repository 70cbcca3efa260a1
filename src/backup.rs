//! Online backup between two connections.
//!
//! A [`Backup`] copies the pages of one database into another while both stay
//! open. Copying can be done in one step or incrementally, so that other
//! connections get a chance to use the source between steps.

use std::ffi::{CString, c_int};
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::thread;
use std::time::Duration;

use libsqlite3_sys as ffi;
use tracing::{debug, trace};

use crate::database::Database;
use crate::error::{EngineError, Error, Result};

/// Successful outcome of [`Backup::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupStep {
   /// Pages were copied and more remain.
   More,
   /// Every page was copied.
   Done,
   /// The source database is locked by another connection, retry later.
   Busy,
   /// The source database is locked by this process, retry later.
   Locked,
}

/// Page counts after the most recent step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
   /// Pages still to be copied.
   pub remaining: usize,
   /// Total pages in the source database.
   pub page_count: usize,
}

/// An in-progress backup from `src` into `dest`.
///
/// The destination is written page by page and must not be used by other
/// statements until the backup is done. The engine handle is released when the
/// `Backup` is dropped, whether or not every page was copied.
///
/// ```
/// use scoped_sqlite::{Backup, BackupStep, Database};
///
/// let src = Database::open_in_memory()?;
/// src.exec("CREATE TABLE t (v TEXT); INSERT INTO t VALUES ('copied')")?;
///
/// let dest = Database::open_in_memory()?;
/// let mut backup = Backup::new(&dest, "main", &src, "main")?;
/// assert_eq!(backup.step(-1)?, BackupStep::Done);
/// drop(backup);
///
/// assert_eq!(dest.exec_and_get("SELECT v FROM t")?.as_text(), "copied");
/// # Ok::<_, scoped_sqlite::Error>(())
/// ```
#[derive(Debug)]
pub struct Backup<'a> {
   handle: NonNull<ffi::sqlite3_backup>,
   _conns: PhantomData<&'a Database>,
}

impl<'a> Backup<'a> {
   /// Prepare a backup of database `src_name` of `src` into database
   /// `dest_name` of `dest`.
   ///
   /// Database names are `"main"`, `"temp"` or the name of an attached
   /// database. Fails with [`Error::Backup`] carrying the destination
   /// connection's error, e.g. when both connections are the same or the
   /// destination has an open read transaction.
   pub fn new(dest: &'a Database, dest_name: &str, src: &'a Database, src_name: &str) -> Result<Self> {
      let c_dest_name = CString::new(dest_name)?;
      let c_src_name = CString::new(src_name)?;

      let handle = unsafe {
         ffi::sqlite3_backup_init(
            dest.handle(),
            c_dest_name.as_ptr(),
            src.handle(),
            c_src_name.as_ptr(),
         )
      };

      let handle = NonNull::new(handle).ok_or_else(|| {
         let error = unsafe { EngineError::from_handle(dest.handle()) };
         debug!(
            dest = %dest.filename(),
            src = %src.filename(),
            error = %error,
            "Failed to start backup"
         );
         Error::Backup(error)
      })?;

      debug!(
         dest = %dest.filename(),
         dest_name,
         src = %src.filename(),
         src_name,
         "Backup started"
      );
      Ok(Self {
         handle,
         _conns: PhantomData,
      })
   }

   /// Copy up to `pages` pages; a negative count copies all remaining pages.
   ///
   /// Busy and locked sources are reported as [`BackupStep::Busy`] and
   /// [`BackupStep::Locked`] so the caller can retry. Any other failure is
   /// an [`Error::Backup`].
   pub fn step(&mut self, pages: i32) -> Result<BackupStep> {
      let rc = unsafe { ffi::sqlite3_backup_step(self.handle.as_ptr(), pages as c_int) };
      let step = match rc {
         ffi::SQLITE_OK => BackupStep::More,
         ffi::SQLITE_DONE => BackupStep::Done,
         ffi::SQLITE_BUSY => BackupStep::Busy,
         ffi::SQLITE_LOCKED => BackupStep::Locked,
         _ => return Err(Error::Backup(EngineError::from_code(rc))),
      };

      trace!(
         ?step,
         remaining = self.remaining(),
         page_count = self.page_count(),
         "Backup step"
      );
      Ok(step)
   }

   /// Pages left to copy after the most recent step.
   pub fn remaining(&self) -> usize {
      usize::try_from(unsafe { ffi::sqlite3_backup_remaining(self.handle.as_ptr()) }).unwrap_or(0)
   }

   /// Total pages of the source as of the most recent step.
   pub fn page_count(&self) -> usize {
      usize::try_from(unsafe { ffi::sqlite3_backup_pagecount(self.handle.as_ptr()) }).unwrap_or(0)
   }

   /// Current page counts.
   pub fn progress(&self) -> Progress {
      Progress {
         remaining: self.remaining(),
         page_count: self.page_count(),
      }
   }

   /// Step until every page is copied.
   ///
   /// Sleeps `pause` between steps that left work to do (including busy and
   /// locked sources) and reports progress after every step. A negative
   /// `pages_per_step` copies everything in one step; zero is rejected since
   /// it never makes progress.
   pub fn run_to_completion(
      &mut self,
      pages_per_step: i32,
      pause: Duration,
      mut progress: Option<&mut dyn FnMut(Progress)>,
   ) -> Result<()> {
      if pages_per_step == 0 {
         return Err(Error::Backup(EngineError::new(
            ffi::SQLITE_MISUSE,
            "pages_per_step must be non-zero",
         )));
      }

      loop {
         let step = self.step(pages_per_step)?;
         if let Some(callback) = progress.as_mut() {
            callback(self.progress());
         }

         match step {
            BackupStep::Done => return Ok(()),
            BackupStep::More | BackupStep::Busy | BackupStep::Locked => thread::sleep(pause),
         }
      }
   }
}

impl Drop for Backup<'_> {
   fn drop(&mut self) {
      // Errors from the last step were already returned by step().
      unsafe {
         ffi::sqlite3_backup_finish(self.handle.as_ptr());
      }
      trace!("Backup finished");
   }
}
