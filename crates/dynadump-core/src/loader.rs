//! # Dynamic Load Primitive
//!
//! The probe treats the loader as an untrusted black box that may fault.
//! [`ImageLoader`] is the seam: [`Dlopen`] is the real thing, tests plug in
//! stubs that fault on purpose.

use std::ffi::{c_void, CStr};
use std::fmt;
use std::ptr::NonNull;

/// Opaque handle to a loaded module.
///
/// For [`Dlopen`] this is the value returned by `dlopen()`; it stays valid
/// for the lifetime of the process (the probe never calls `dlclose`).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageHandle(NonNull<c_void>);

impl ImageHandle
{
    /// Wrap a raw handle; `None` for null.
    pub fn from_raw(raw: *mut c_void) -> Option<Self>
    {
        NonNull::new(raw).map(Self)
    }

    /// Raw handle for `dlsym` and friends.
    pub fn as_ptr(self) -> *mut c_void
    {
        self.0.as_ptr()
    }
}

impl fmt::Debug for ImageHandle
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "ImageHandle({:p})", self.0.as_ptr())
    }
}

/// A primitive that turns an image identifier into a loaded module.
pub trait ImageLoader
{
    /// Load `image`. On failure return the loader's own description.
    fn load(&self, image: &CStr) -> Result<ImageHandle, String>;
}

impl<F> ImageLoader for F
where
    F: Fn(&CStr) -> Result<ImageHandle, String>,
{
    fn load(&self, image: &CStr) -> Result<ImageHandle, String>
    {
        self(image)
    }
}

/// `dlopen(3)` with configurable mode flags.
#[derive(Debug, Clone, Copy)]
pub struct Dlopen
{
    flags: libc::c_int,
}

impl Dlopen
{
    pub fn new(flags: libc::c_int) -> Self
    {
        Self { flags }
    }
}

impl Default for Dlopen
{
    fn default() -> Self
    {
        Self::new(libc::RTLD_LAZY)
    }
}

impl ImageLoader for Dlopen
{
    fn load(&self, image: &CStr) -> Result<ImageHandle, String>
    {
        let raw = unsafe { libc::dlopen(image.as_ptr(), self.flags) };
        ImageHandle::from_raw(raw).ok_or_else(last_dl_error)
    }
}

/// Message from `dlerror()`, or a generic one if it has none.
fn last_dl_error() -> String
{
    let message = unsafe { libc::dlerror() };
    if message.is_null() {
        return "dlopen returned NULL".to_string();
    }
    unsafe { CStr::from_ptr(message) }.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_null_handle_is_none()
    {
        assert!(ImageHandle::from_raw(std::ptr::null_mut()).is_none());
    }

    #[test]
    fn test_dlopen_missing_image_reports_reason()
    {
        let err = Dlopen::default()
            .load(c"/nonexistent/dynadump/libmissing.dylib")
            .unwrap_err();
        assert!(!err.is_empty());
    }

    #[test]
    fn test_closure_loader()
    {
        let mut dummy = 0u8;
        let handle = ImageHandle::from_raw((&mut dummy as *mut u8).cast()).unwrap();
        let loader = move |_: &CStr| Ok::<_, String>(handle);
        assert_eq!(loader.load(c"anything").unwrap(), handle);
    }
}
