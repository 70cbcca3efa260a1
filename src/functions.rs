//! User-defined SQL functions implemented in Rust.
//!
//! Scalar functions are closures; aggregates implement [`Aggregate`]. The
//! engine owns the registered callback and frees it when the function is
//! replaced or the connection closes. Errors returned by a callback, as well
//! as panics, are reported to SQL as an error of the running statement and
//! never unwind into the engine.

use std::any::Any;
use std::ffi::{CString, c_int, c_void};
use std::mem;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::ptr;
use std::slice;

use libsqlite3_sys as ffi;
use tracing::{debug, warn};

use crate::database::Database;
use crate::error::{EngineError, Error, Result};
use crate::value::{ColumnType, Value};

/// Properties declared when registering a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FunctionFlags(c_int);

impl FunctionFlags {
   /// No special properties.
   pub const NONE: Self = Self(0);
   /// Same arguments always give the same result, which lets the planner
   /// factor calls out and allows use in indexes.
   pub const DETERMINISTIC: Self = Self(ffi::SQLITE_DETERMINISTIC);
   /// Only callable from top-level SQL, not from views, triggers or schema.
   pub const DIRECT_ONLY: Self = Self(ffi::SQLITE_DIRECTONLY);
   /// No side effects, safe to call from schema.
   pub const INNOCUOUS: Self = Self(ffi::SQLITE_INNOCUOUS);

   pub const fn bits(self) -> c_int {
      self.0
   }
}

impl std::ops::BitOr for FunctionFlags {
   type Output = Self;

   fn bitor(self, rhs: Self) -> Self {
      Self(self.0 | rhs.0)
   }
}

/// Arguments of one function invocation.
pub struct Context<'a> {
   args: &'a [*mut ffi::sqlite3_value],
}

impl Context<'_> {
   /// Number of arguments.
   pub fn len(&self) -> usize {
      self.args.len()
   }

   pub fn is_empty(&self) -> bool {
      self.args.is_empty()
   }

   /// Storage class of argument `index`.
   pub fn value_type(&self, index: usize) -> Result<ColumnType> {
      let arg = self.arg(index)?;
      Ok(ColumnType::from_raw(unsafe { ffi::sqlite3_value_type(arg) }))
   }

   /// Owned copy of argument `index` in its stored type.
   pub fn get(&self, index: usize) -> Result<Value> {
      Ok(match self.value_type(index)? {
         ColumnType::Null => Value::Null,
         ColumnType::Integer => Value::Integer(self.get_i64(index)?),
         ColumnType::Float => Value::Real(self.get_f64(index)?),
         ColumnType::Text => Value::Text(self.get_text(index)?),
         ColumnType::Blob => Value::Blob(self.get_blob(index)?),
      })
   }

   /// Argument `index` converted to an integer.
   pub fn get_i64(&self, index: usize) -> Result<i64> {
      let arg = self.arg(index)?;
      Ok(unsafe { ffi::sqlite3_value_int64(arg) })
   }

   /// Argument `index` converted to a float.
   pub fn get_f64(&self, index: usize) -> Result<f64> {
      let arg = self.arg(index)?;
      Ok(unsafe { ffi::sqlite3_value_double(arg) })
   }

   /// Argument `index` converted to text, empty for NULL.
   pub fn get_text(&self, index: usize) -> Result<String> {
      let arg = self.arg(index)?;
      let bytes = unsafe { value_bytes(arg, ffi::sqlite3_value_text(arg)) };
      Ok(String::from_utf8_lossy(&bytes).into_owned())
   }

   /// Argument `index` as raw bytes, empty for NULL.
   pub fn get_blob(&self, index: usize) -> Result<Vec<u8>> {
      let arg = self.arg(index)?;
      Ok(unsafe { value_bytes(arg, ffi::sqlite3_value_blob(arg)) })
   }

   fn arg(&self, index: usize) -> Result<*mut ffi::sqlite3_value> {
      self.args.get(index).copied().ok_or_else(|| {
         Error::Function(EngineError::new(
            ffi::SQLITE_RANGE,
            format!("argument index {index} out of range, function got {}", self.len()),
         ))
      })
   }
}

/// An aggregate SQL function such as `sum()` or `group_concat()`.
///
/// A fresh state is created with [`init`](Aggregate::init) on the first row
/// of each group. [`finalize`](Aggregate::finalize) receives `None` when the
/// group had no rows.
pub trait Aggregate: Send + 'static {
   type State;

   fn init(&self) -> Self::State;

   fn step(&self, state: &mut Self::State, ctx: &Context<'_>) -> Result<()>;

   fn finalize(&self, state: Option<Self::State>) -> Result<Value>;
}

impl Database {
   /// Register a scalar function taking `n_args` arguments (-1 for any number).
   ///
   /// Registering the same name and argument count again replaces the
   /// previous function.
   ///
   /// ```
   /// use scoped_sqlite::{Database, FunctionFlags, Value};
   ///
   /// let db = Database::open_in_memory()?;
   /// db.create_scalar_function("halve", 1, FunctionFlags::DETERMINISTIC, |ctx| {
   ///     Ok(Value::Real(ctx.get_f64(0)? / 2.0))
   /// })?;
   /// assert_eq!(db.exec_and_get("SELECT halve(5)")?.as_f64(), 2.5);
   /// # Ok::<_, scoped_sqlite::Error>(())
   /// ```
   pub fn create_scalar_function<F>(
      &self,
      name: &str,
      n_args: i32,
      flags: FunctionFlags,
      function: F,
   ) -> Result<()>
   where
      F: FnMut(&Context<'_>) -> Result<Value> + Send + 'static,
   {
      let c_name = CString::new(name)?;
      let user_data = Box::into_raw(Box::new(function));

      // On failure the engine has already called the destroy callback.
      let rc = unsafe {
         ffi::sqlite3_create_function_v2(
            self.handle(),
            c_name.as_ptr(),
            n_args,
            ffi::SQLITE_UTF8 | flags.bits(),
            user_data.cast(),
            Some(call_scalar::<F>),
            None,
            None,
            Some(destroy::<F>),
         )
      };
      self.check(rc).map_err(Error::Function)?;

      debug!(name, n_args, "Registered scalar function");
      Ok(())
   }

   /// Register an aggregate function taking `n_args` arguments (-1 for any number).
   pub fn create_aggregate_function<A: Aggregate>(
      &self,
      name: &str,
      n_args: i32,
      flags: FunctionFlags,
      aggregate: A,
   ) -> Result<()> {
      let c_name = CString::new(name)?;
      let user_data = Box::into_raw(Box::new(aggregate));

      let rc = unsafe {
         ffi::sqlite3_create_function_v2(
            self.handle(),
            c_name.as_ptr(),
            n_args,
            ffi::SQLITE_UTF8 | flags.bits(),
            user_data.cast(),
            None,
            Some(call_aggregate_step::<A>),
            Some(call_aggregate_final::<A>),
            Some(destroy::<A>),
         )
      };
      self.check(rc).map_err(Error::Function)?;

      debug!(name, n_args, "Registered aggregate function");
      Ok(())
   }
}

unsafe extern "C" fn call_scalar<F>(
   ctx: *mut ffi::sqlite3_context,
   argc: c_int,
   argv: *mut *mut ffi::sqlite3_value,
) where
   F: FnMut(&Context<'_>) -> Result<Value> + Send + 'static,
{
   let outcome = catch_unwind(AssertUnwindSafe(|| {
      let function = unsafe { &mut *ffi::sqlite3_user_data(ctx).cast::<F>() };
      let args = unsafe { arguments(argc, argv) };
      function(&Context { args })
   }));
   unsafe { report(ctx, outcome) };
}

unsafe extern "C" fn call_aggregate_step<A: Aggregate>(
   ctx: *mut ffi::sqlite3_context,
   argc: c_int,
   argv: *mut *mut ffi::sqlite3_value,
) {
   let outcome = catch_unwind(AssertUnwindSafe(|| {
      let aggregate = unsafe { &*ffi::sqlite3_user_data(ctx).cast::<A>() };
      let slot = unsafe {
         ffi::sqlite3_aggregate_context(ctx, mem::size_of::<*mut A::State>() as c_int)
      }
      .cast::<*mut A::State>();
      if slot.is_null() {
         return Err(Error::Function(EngineError::from_code(ffi::SQLITE_NOMEM)));
      }

      // The slot starts zeroed, i.e. a null state pointer.
      let state = unsafe {
         if (*slot).is_null() {
            *slot = Box::into_raw(Box::new(aggregate.init()));
         }
         &mut **slot
      };
      let args = unsafe { arguments(argc, argv) };
      aggregate.step(state, &Context { args })
   }));

   match outcome {
      Ok(Ok(())) => {}
      Ok(Err(error)) => unsafe { result_error(ctx, &error.to_string()) },
      Err(payload) => unsafe { result_error(ctx, &panic_message(payload.as_ref())) },
   }
}

unsafe extern "C" fn call_aggregate_final<A: Aggregate>(ctx: *mut ffi::sqlite3_context) {
   let outcome = catch_unwind(AssertUnwindSafe(|| {
      let aggregate = unsafe { &*ffi::sqlite3_user_data(ctx).cast::<A>() };

      // A zero size does not allocate: null means step never ran.
      let slot = unsafe { ffi::sqlite3_aggregate_context(ctx, 0) }.cast::<*mut A::State>();
      let state = unsafe {
         if slot.is_null() || (*slot).is_null() {
            None
         } else {
            let state = Box::from_raw(*slot);
            *slot = ptr::null_mut();
            Some(*state)
         }
      };
      aggregate.finalize(state)
   }));
   unsafe { report(ctx, outcome) };
}

unsafe extern "C" fn destroy<T>(user_data: *mut c_void) {
   if !user_data.is_null() {
      drop(unsafe { Box::from_raw(user_data.cast::<T>()) });
   }
}

unsafe fn arguments<'a>(argc: c_int, argv: *mut *mut ffi::sqlite3_value) -> &'a [*mut ffi::sqlite3_value] {
   match usize::try_from(argc) {
      Ok(len) if len > 0 && !argv.is_null() => unsafe { slice::from_raw_parts(argv, len) },
      _ => &[],
   }
}

unsafe fn value_bytes(arg: *mut ffi::sqlite3_value, ptr: *const impl Sized) -> Vec<u8> {
   // Read the size after the pointer, which may have triggered a conversion.
   let len = usize::try_from(unsafe { ffi::sqlite3_value_bytes(arg) }).unwrap_or(0);
   if ptr.is_null() || len == 0 {
      return Vec::new();
   }
   unsafe { slice::from_raw_parts(ptr.cast::<u8>(), len) }.to_vec()
}

unsafe fn report(ctx: *mut ffi::sqlite3_context, outcome: std::thread::Result<Result<Value>>) {
   match outcome {
      Ok(Ok(value)) => unsafe { result_value(ctx, &value) },
      Ok(Err(error)) => unsafe { result_error(ctx, &error.to_string()) },
      Err(payload) => unsafe { result_error(ctx, &panic_message(payload.as_ref())) },
   }
}

unsafe fn result_value(ctx: *mut ffi::sqlite3_context, value: &Value) {
   unsafe {
      match value {
         Value::Null => ffi::sqlite3_result_null(ctx),
         Value::Integer(i) => ffi::sqlite3_result_int64(ctx, *i),
         Value::Real(r) => ffi::sqlite3_result_double(ctx, *r),
         Value::Text(s) => match c_int::try_from(s.len()) {
            Ok(len) => ffi::sqlite3_result_text(ctx, s.as_ptr().cast(), len, ffi::SQLITE_TRANSIENT()),
            Err(_) => ffi::sqlite3_result_error_toobig(ctx),
         },
         Value::Blob(b) => match c_int::try_from(b.len()) {
            Ok(len) => ffi::sqlite3_result_blob(ctx, b.as_ptr().cast(), len, ffi::SQLITE_TRANSIENT()),
            Err(_) => ffi::sqlite3_result_error_toobig(ctx),
         },
      }
   }
}

unsafe fn result_error(ctx: *mut ffi::sqlite3_context, message: &str) {
   let len = c_int::try_from(message.len()).unwrap_or(c_int::MAX);
   unsafe { ffi::sqlite3_result_error(ctx, message.as_ptr().cast(), len) };
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
   let detail = payload
      .downcast_ref::<&str>()
      .map(|s| (*s).to_owned())
      .or_else(|| payload.downcast_ref::<String>().cloned())
      .unwrap_or_else(|| "unknown panic".to_owned());
   warn!(panic = %detail, "User function panicked");
   format!("user function panicked: {detail}")
}

#[cfg(test)]
mod tests {
   use super::*;
   use std::sync::Arc;
   use std::sync::atomic::{AtomicUsize, Ordering};

   struct JoinText;

   impl Aggregate for JoinText {
      type State = Vec<String>;

      fn init(&self) -> Vec<String> {
         Vec::new()
      }

      fn step(&self, state: &mut Vec<String>, ctx: &Context<'_>) -> Result<()> {
         state.push(ctx.get_text(0)?);
         Ok(())
      }

      fn finalize(&self, state: Option<Vec<String>>) -> Result<Value> {
         Ok(state.map_or(Value::Null, |mut parts| {
            parts.sort();
            Value::Text(parts.join(","))
         }))
      }
   }

   fn test_db() -> Database {
      let db = Database::open_in_memory().unwrap();
      db.exec(
         "CREATE TABLE t (grp TEXT, v TEXT);
          INSERT INTO t VALUES ('a', 'x'), ('a', 'y'), ('b', 'z');",
      )
      .unwrap();
      db
   }

   #[test]
   fn test_scalar_function_with_state() {
      let db = test_db();
      let calls = Arc::new(AtomicUsize::new(0));
      let counter = Arc::clone(&calls);
      db.create_scalar_function("shout", 1, FunctionFlags::NONE, move |ctx| {
         counter.fetch_add(1, Ordering::SeqCst);
         Ok(match ctx.get(0)? {
            Value::Null => Value::Null,
            other => Value::Text(format!("{}!", other.to_string().to_uppercase())),
         })
      })
      .unwrap();

      let mut query = crate::Statement::new(&db, "SELECT shout(v) FROM t ORDER BY v").unwrap();
      let mut values = Vec::new();
      while query.execute_step().unwrap() {
         values.push(query.column(0).unwrap().as_text());
      }
      assert_eq!(values, ["X!", "Y!", "Z!"]);
      assert_eq!(calls.load(Ordering::SeqCst), 3);

      assert!(db.exec_and_get("SELECT shout(NULL)").unwrap().is_null());
   }

   #[test]
   fn test_variadic_function_sees_all_arguments() {
      let db = test_db();
      db.create_scalar_function("argc", -1, FunctionFlags::DETERMINISTIC, |ctx| {
         Ok(Value::Integer(ctx.len() as i64))
      })
      .unwrap();
      assert_eq!(db.exec_and_get("SELECT argc()").unwrap().as_i64(), 0);
      assert_eq!(db.exec_and_get("SELECT argc(1, 'two', x'03')").unwrap().as_i64(), 3);
   }

   #[test]
   fn test_wrong_argument_count_fails_to_compile() {
      let db = test_db();
      db.create_scalar_function("one", 1, FunctionFlags::NONE, |_| Ok(Value::Integer(1)))
         .unwrap();
      let err = db.exec_and_get("SELECT one(1, 2)").unwrap_err();
      assert_eq!(err.error_code(), "COMPILE_ERROR");
      assert!(err.to_string().contains("wrong number of arguments"));
   }

   #[test]
   fn test_callback_error_becomes_sql_error() {
      let db = test_db();
      db.create_scalar_function("fail", 0, FunctionFlags::NONE, |_| {
         Err(Error::Other("boom".into()))
      })
      .unwrap();

      let err = db.exec_and_get("SELECT fail()").unwrap_err();
      assert_eq!(err.error_code(), "STEP_ERROR");
      assert!(err.to_string().contains("boom"));
   }

   #[test]
   fn test_argument_out_of_range_is_an_error() {
      let db = test_db();
      db.create_scalar_function("second", -1, FunctionFlags::NONE, |ctx| ctx.get(1))
         .unwrap();
      assert_eq!(db.exec_and_get("SELECT second(1, 2)").unwrap().as_i64(), 2);

      let err = db.exec_and_get("SELECT second(1)").unwrap_err();
      assert!(err.to_string().contains("argument index 1 out of range"));
   }

   #[test]
   fn test_panic_is_caught() {
      let db = test_db();
      db.create_scalar_function("explode", 0, FunctionFlags::NONE, |_| -> Result<Value> {
         panic!("kaboom")
      })
      .unwrap();

      let err = db.exec_and_get("SELECT explode()").unwrap_err();
      assert_eq!(err.error_code(), "STEP_ERROR");
      assert!(err.to_string().contains("kaboom"));

      // The connection is still usable
      assert_eq!(db.exec_and_get("SELECT 1").unwrap().as_i64(), 1);
   }

   #[test]
   fn test_aggregate_groups_and_empty_input() {
      let db = test_db();
      db.create_aggregate_function("join_text", 1, FunctionFlags::DETERMINISTIC, JoinText)
         .unwrap();

      let mut query = crate::Statement::new(
         &db,
         "SELECT grp, join_text(v) FROM t GROUP BY grp ORDER BY grp",
      )
      .unwrap();
      let mut groups = Vec::new();
      while query.execute_step().unwrap() {
         groups.push((
            query.column(0).unwrap().as_text(),
            query.column(1).unwrap().as_text(),
         ));
      }
      assert_eq!(
         groups,
         [("a".to_owned(), "x,y".to_owned()), ("b".to_owned(), "z".to_owned())]
      );

      let empty = db.exec_and_get("SELECT join_text(v) FROM t WHERE 0").unwrap();
      assert!(empty.is_null());
   }

   #[test]
   fn test_invalid_registration_is_reported() {
      let db = test_db();
      let err = db
         .create_scalar_function("bad", -2, FunctionFlags::NONE, |_| Ok(Value::Null))
         .unwrap_err();
      assert_eq!(err.error_code(), "FUNCTION_ERROR");
      assert_eq!(err.code(), ffi::SQLITE_MISUSE);

      assert!(matches!(
         db.create_scalar_function("nul\0name", 0, FunctionFlags::NONE, |_| Ok(Value::Null)),
         Err(Error::Nul(_))
      ));
   }
}
