//! Argv marshalling for the engine's `(argc, argv)` entry points.

use std::ffi::{CString, NulError};
use std::os::raw::{c_char, c_int};
use std::ptr;

/// An argv-style table: pointers to NUL-terminated copies of each argument,
/// plus a trailing null pointer, matching the calling convention of
/// `query_stable_v2` and `connect_chdb`.
///
/// The `CString`s own the byte buffers and `ptrs` points into them; both live
/// until the `Argv` is dropped, so the table stays valid for the full
/// duration of any synchronous native call it is passed to. The native side
/// must not retain the pointers past that call.
pub struct Argv {
    // Owns the buffers `ptrs` points into.
    strings: Vec<CString>,
    ptrs: Vec<*mut c_char>,
}

impl Argv {
    /// Build a pointer table for `args`. An empty slice is valid and yields
    /// `argc() == 0` with a table holding only the trailing null.
    ///
    /// Fails only when an argument contains an interior NUL byte.
    pub fn new<S: AsRef<str>>(args: &[S]) -> Result<Self, NulError> {
        let strings = args
            .iter()
            .map(|a| CString::new(a.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        let mut ptrs: Vec<*mut c_char> = strings.iter().map(|s| s.as_ptr() as *mut c_char).collect();
        ptrs.push(ptr::null_mut());
        Ok(Self { strings, ptrs })
    }

    pub fn argc(&self) -> c_int {
        self.strings.len() as c_int
    }

    /// Pointer to the table. Valid while `self` is alive; the heap buffers do
    /// not move when the `Argv` value itself does.
    pub fn argv(&mut self) -> *mut *mut c_char {
        self.ptrs.as_mut_ptr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CStr;

    fn entry(argv: &Argv, i: usize) -> String {
        unsafe { CStr::from_ptr(argv.ptrs[i]) }
            .to_str()
            .unwrap()
            .to_string()
    }

    #[test]
    fn builds_null_terminated_table() {
        let args = ["clickhouse", "--path=/tmp/db", "--readonly=1"];
        let argv = Argv::new(&args).unwrap();
        assert_eq!(argv.argc(), 3);
        assert_eq!(argv.ptrs.len(), 4);
        for (i, want) in args.iter().enumerate() {
            assert_eq!(entry(&argv, i), *want);
        }
        assert!(argv.ptrs[3].is_null());
    }

    #[test]
    fn empty_input_is_valid() {
        let argv = Argv::new::<&str>(&[]).unwrap();
        assert_eq!(argv.argc(), 0);
        assert_eq!(argv.ptrs.len(), 1);
        assert!(argv.ptrs[0].is_null());
    }

    #[test]
    fn interior_nul_is_rejected() {
        assert!(Argv::new(&["ok", "bad\0arg"]).is_err());
    }

    #[test]
    fn table_survives_moves() {
        let argv = Argv::new(&["one", "two"]).unwrap();
        let moved = argv;
        assert_eq!(entry(&moved, 0), "one");
        assert_eq!(entry(&moved, 1), "two");
    }
}
