use crate::sys::*;
use libloading::{Library, Symbol};
use std::os::raw::{c_char, c_int};

/// Engine entry points resolved from the loaded native library.
///
/// Field names are the exact exported symbol names of libchdb's stable v2
/// ABI. All fields are plain function pointers, so an `Api` stays valid for
/// as long as the library it was resolved from remains loaded.
#[derive(Debug)]
pub struct Api {
    pub query_stable_v2: unsafe extern "C" fn(c_int, *mut *mut c_char) -> *mut local_result_v2,
    pub free_result_v2: unsafe extern "C" fn(*mut local_result_v2),
    pub connect_chdb: unsafe extern "C" fn(c_int, *mut *mut c_char) -> *mut *mut chdb_conn,
    pub close_conn: unsafe extern "C" fn(*mut *mut chdb_conn),
    pub query_conn: unsafe extern "C" fn(
        *mut chdb_conn,
        *const c_char,
        *const c_char,
    ) -> *mut local_result_v2,
    pub query_conn_streaming: unsafe extern "C" fn(
        *mut chdb_conn,
        *const c_char,
        *const c_char,
    ) -> *mut chdb_streaming_result,
    pub chdb_streaming_result_error:
        unsafe extern "C" fn(*mut chdb_streaming_result) -> *const c_char,
    pub chdb_streaming_fetch_result: unsafe extern "C" fn(
        *mut chdb_conn,
        *mut chdb_streaming_result,
    ) -> *mut local_result_v2,
    pub chdb_streaming_cancel_query:
        unsafe extern "C" fn(*mut chdb_conn, *mut chdb_streaming_result),
    pub chdb_destroy_result: unsafe extern "C" fn(*mut chdb_streaming_result),
}

impl Api {
    pub unsafe fn load(lib: &Library) -> Result<Self, libloading::Error> {
        unsafe fn get<T: Copy>(
            lib: &Library,
            name: &'static [u8],
        ) -> Result<T, libloading::Error> {
            let sym: Symbol<T> = lib.get::<T>(name)?;
            Ok(*sym)
        }
        Ok(Self {
            query_stable_v2: get(
                lib,
                concat!(stringify!(query_stable_v2), "\0").as_bytes(),
            )?,
            free_result_v2: get(
                lib,
                concat!(stringify!(free_result_v2), "\0").as_bytes(),
            )?,
            connect_chdb: get(lib, concat!(stringify!(connect_chdb), "\0").as_bytes())?,
            close_conn: get(lib, concat!(stringify!(close_conn), "\0").as_bytes())?,
            query_conn: get(lib, concat!(stringify!(query_conn), "\0").as_bytes())?,
            query_conn_streaming: get(
                lib,
                concat!(stringify!(query_conn_streaming), "\0").as_bytes(),
            )?,
            chdb_streaming_result_error: get(
                lib,
                concat!(stringify!(chdb_streaming_result_error), "\0").as_bytes(),
            )?,
            chdb_streaming_fetch_result: get(
                lib,
                concat!(stringify!(chdb_streaming_fetch_result), "\0").as_bytes(),
            )?,
            chdb_streaming_cancel_query: get(
                lib,
                concat!(stringify!(chdb_streaming_cancel_query), "\0").as_bytes(),
            )?,
            chdb_destroy_result: get(
                lib,
                concat!(stringify!(chdb_destroy_result), "\0").as_bytes(),
            )?,
        })
    }
}
