#![allow(non_camel_case_types)]
use std::os::raw::{c_char, c_void};

/// Result block returned by the engine's query entry points.
///
/// Layout is libchdb's stable v2 ABI on little-endian 64-bit platforms:
/// seven 8-byte fields at offsets 0/8/16/24/32/40/48.
///
/// - `buf` points to `len` bytes of payload in the requested output format.
///   The payload is not NUL-terminated; always read through `len`.
/// - `_vec` is engine-internal backing storage; never read it.
/// - When `error_message` is non-null it is a NUL-terminated message and the
///   payload fields are meaningless.
///
/// Every block handed out by the engine must be released exactly once via
/// `free_result_v2`, whatever the decode outcome.
#[repr(C)]
pub struct local_result_v2 {
    pub buf: *mut c_char,
    pub len: usize,
    pub _vec: *mut c_void,
    pub elapsed: f64,
    pub rows_read: u64,
    pub bytes_read: u64,
    pub error_message: *mut c_char,
}

/// Opaque engine connection.
///
/// `connect_chdb` returns a pointer to a heap slot holding one of these;
/// `close_conn` takes the slot, while `query_conn` and the streaming calls
/// take the dereferenced slot value.
#[repr(C)]
pub struct chdb_conn {
    _private: [u8; 0],
}

/// Opaque streaming cursor handle.
#[repr(C)]
pub struct chdb_streaming_result {
    _private: [u8; 0],
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{offset_of, size_of};

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn result_block_layout_matches_engine_abi() {
        assert_eq!(offset_of!(local_result_v2, buf), 0);
        assert_eq!(offset_of!(local_result_v2, len), 8);
        assert_eq!(offset_of!(local_result_v2, _vec), 16);
        assert_eq!(offset_of!(local_result_v2, elapsed), 24);
        assert_eq!(offset_of!(local_result_v2, rows_read), 32);
        assert_eq!(offset_of!(local_result_v2, bytes_read), 40);
        assert_eq!(offset_of!(local_result_v2, error_message), 48);
        assert_eq!(size_of::<local_result_v2>(), 56);
    }
}
