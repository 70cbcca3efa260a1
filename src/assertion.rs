//! Fatal reporting for cleanup paths.
//!
//! Destructors cannot return a [`crate::Error`], so precondition violations
//! detected while releasing engine handles (closing a connection that still
//! has unfinalized statements, for instance) are reported here instead.
//!
//! By default a failure is logged at `error` level and, in debug builds,
//! panics unless the thread is already unwinding. Applications can install
//! their own handler with [`set_assertion_handler`] to abort, collect, or
//! ignore these failures.

use std::sync::RwLock;

use tracing::error;

/// Details of a failed cleanup assertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertionFailure {
   /// Source file of the failing check.
   pub file: &'static str,
   /// Source line of the failing check.
   pub line: u32,
   /// The checked expression.
   pub expression: &'static str,
   /// Engine message or description of the violation.
   pub message: String,
}

/// Signature of a custom assertion handler.
pub type AssertionHandler = fn(&AssertionFailure);

static HANDLER: RwLock<Option<AssertionHandler>> = RwLock::new(None);

/// Replaces the process-wide assertion handler. `None` restores the default.
pub fn set_assertion_handler(handler: Option<AssertionHandler>) {
   match HANDLER.write() {
      Ok(mut slot) => *slot = handler,
      Err(poisoned) => *poisoned.into_inner() = handler,
   }
}

pub(crate) fn assertion_failed(failure: AssertionFailure) {
   let handler = match HANDLER.read() {
      Ok(slot) => *slot,
      Err(poisoned) => *poisoned.into_inner(),
   };

   match handler {
      Some(handler) => handler(&failure),
      None => default_handler(&failure),
   }
}

fn default_handler(failure: &AssertionFailure) {
   error!(
      file = failure.file,
      line = failure.line,
      expression = failure.expression,
      "assertion failed: {}",
      failure.message
   );

   if cfg!(debug_assertions) && !std::thread::panicking() {
      panic!(
         "{}:{}: assertion failed ({}): {}",
         failure.file, failure.line, failure.expression, failure.message
      );
   }
}

/// Checks a cleanup-path invariant, routing failures to the assertion handler.
macro_rules! sqlite_assert {
   ($cond:expr, $msg:expr) => {
      if !$cond {
         $crate::assertion::assertion_failed($crate::assertion::AssertionFailure {
            file: file!(),
            line: line!(),
            expression: stringify!($cond),
            message: ::std::string::ToString::to_string(&$msg),
         });
      }
   };
}

pub(crate) use sqlite_assert;
