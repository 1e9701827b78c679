//! dyld queries.

use std::ffi::{c_char, c_void, CStr, CString};

use once_cell::sync::Lazy;
use tracing::debug;

use crate::error::Result;
use crate::types::Address;

type SharedCacheContainsPath = unsafe extern "C" fn(*const c_char) -> bool;
type ImagePathContainingAddress = unsafe extern "C" fn(*const c_void) -> *const c_char;
type SharedCacheFilePath = unsafe extern "C" fn() -> *const c_char;
/// `dyld_shared_cache_for_file(path, ^(dyld_shared_cache_t))`
type SharedCacheForFile = unsafe extern "C" fn(*const c_char, *mut c_void) -> bool;
/// `dyld_shared_cache_for_each_image(cache, ^(dyld_image_t))`
type SharedCacheForEachImage = unsafe extern "C" fn(*mut c_void, *mut c_void);
type ImageGetInstallName = unsafe extern "C" fn(*mut c_void) -> *const c_char;

/// Listed for shared-cache images whose install name dyld cannot report.
pub const UNKNOWN_INSTALL_NAME: &str = "???";

static CAPABILITIES: Lazy<DyldCapabilities> = Lazy::new(DyldCapabilities::resolve);

/// Optional dyld functions, looked up with `dlsym(RTLD_DEFAULT, ...)`.
///
/// Which of these exist depends on the OS release. A missing function gives
/// the conservative answer: "not in the shared cache", "unknown image".
#[derive(Debug, Clone, Copy, Default)]
pub struct DyldCapabilities
{
    shared_cache_contains_path: Option<SharedCacheContainsPath>,
    image_path_containing_address: Option<ImagePathContainingAddress>,
    shared_cache_file_path: Option<SharedCacheFilePath>,
    shared_cache_for_file: Option<SharedCacheForFile>,
    shared_cache_for_each_image: Option<SharedCacheForEachImage>,
    image_get_installname: Option<ImageGetInstallName>,
}

impl DyldCapabilities
{
    /// Capabilities of the running process, resolved on first use.
    pub fn get() -> &'static DyldCapabilities
    {
        &CAPABILITIES
    }

    /// No optional functions at all.
    pub fn none() -> Self
    {
        Self::default()
    }

    fn resolve() -> Self
    {
        let capabilities = unsafe {
            Self {
                shared_cache_contains_path: lookup(c"_dyld_shared_cache_contains_path")
                    .map(|sym| std::mem::transmute::<*mut c_void, SharedCacheContainsPath>(sym)),
                image_path_containing_address: lookup(c"dyld_image_path_containing_address")
                    .map(|sym| std::mem::transmute::<*mut c_void, ImagePathContainingAddress>(sym)),
                shared_cache_file_path: lookup(c"dyld_shared_cache_file_path")
                    .map(|sym| std::mem::transmute::<*mut c_void, SharedCacheFilePath>(sym)),
                shared_cache_for_file: lookup(c"dyld_shared_cache_for_file")
                    .map(|sym| std::mem::transmute::<*mut c_void, SharedCacheForFile>(sym)),
                shared_cache_for_each_image: lookup(c"dyld_shared_cache_for_each_image")
                    .map(|sym| std::mem::transmute::<*mut c_void, SharedCacheForEachImage>(sym)),
                image_get_installname: lookup(c"dyld_image_get_installname")
                    .map(|sym| std::mem::transmute::<*mut c_void, ImageGetInstallName>(sym)),
            }
        };
        debug!(
            shared_cache_contains_path = capabilities.shared_cache_contains_path.is_some(),
            image_path_containing_address = capabilities.image_path_containing_address.is_some(),
            shared_cache_file_path = capabilities.shared_cache_file_path.is_some(),
            shared_cache_enumeration =
                capabilities.shared_cache_for_file.is_some() && capabilities.shared_cache_for_each_image.is_some(),
            image_get_installname = capabilities.image_get_installname.is_some(),
            "resolved dyld capabilities"
        );
        capabilities
    }

    /// Returns `true` if dyld can answer shared-cache membership queries.
    pub fn can_query_shared_cache(&self) -> bool
    {
        self.shared_cache_contains_path.is_some()
    }

    /// Returns `true` if `path` names an image in the dyld shared cache.
    pub fn shared_cache_contains(&self, path: &str) -> bool
    {
        let (Some(contains), Ok(path)) = (self.shared_cache_contains_path, CString::new(path)) else {
            return false;
        };
        unsafe { contains(path.as_ptr()) }
    }

    /// Install name of the loaded image that contains `address`.
    pub fn image_path_containing(&self, address: Address) -> Option<String>
    {
        let query = self.image_path_containing_address?;
        let path = unsafe { query(address.as_ptr::<c_void>()) };
        c_string(path)
    }

    /// Path of the shared cache file this process maps.
    pub fn shared_cache_path(&self) -> Option<String>
    {
        let query = self.shared_cache_file_path?;
        c_string(unsafe { query() })
    }

    /// Install names of every image in the shared cache file at `cache_path`,
    /// in cache order.
    ///
    /// `None` when dyld cannot enumerate shared caches or does not recognise
    /// the file. Images dyld cannot name are listed as [`UNKNOWN_INSTALL_NAME`].
    #[cfg(target_os = "macos")]
    pub fn shared_cache_install_names(&self, cache_path: &str) -> Option<Vec<String>>
    {
        use crate::platform::macos::block::with_block;

        let for_file = self.shared_cache_for_file?;
        let for_each_image = self.shared_cache_for_each_image?;
        let path = CString::new(cache_path).ok()?;

        let mut names = Vec::new();
        let mut on_image = |image: *mut c_void| names.push(self.install_name(image));
        let mut on_cache = |cache: *mut c_void| {
            with_block(&mut on_image, |image_block| unsafe { for_each_image(cache, image_block) });
        };
        let found = with_block(&mut on_cache, |cache_block| unsafe { for_file(path.as_ptr(), cache_block) });
        debug!(cache_path, found, images = names.len(), "enumerated shared cache");
        found.then_some(names)
    }

    #[cfg(not(target_os = "macos"))]
    pub fn shared_cache_install_names(&self, _cache_path: &str) -> Option<Vec<String>>
    {
        None
    }

    #[cfg(target_os = "macos")]
    fn install_name(&self, image: *mut c_void) -> String
    {
        self.image_get_installname
            .and_then(|get| c_string(unsafe { get(image) }))
            .unwrap_or_else(|| UNKNOWN_INSTALL_NAME.to_string())
    }
}

unsafe fn lookup(name: &CStr) -> Option<*mut c_void>
{
    let sym = libc::dlsym(libc::RTLD_DEFAULT, name.as_ptr());
    (!sym.is_null()).then_some(sym)
}

fn c_string(ptr: *const c_char) -> Option<String>
{
    if ptr.is_null() {
        return None;
    }
    Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
}

/// One image mapped into the current process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedImageInfo
{
    /// dyld's index for the image (not stable across loads).
    pub index: u32,
    /// Install name or path.
    pub path: String,
    /// Canonical address of the Mach-O header.
    pub header: Address,
    /// ASLR slide.
    pub slide: i64,
}

/// Enumerate the images loaded in this process, in dyld order.
///
/// Images unloaded while we iterate show up as gaps and are skipped.
#[cfg(target_os = "macos")]
pub fn loaded_images() -> Result<Vec<LoadedImageInfo>>
{
    use crate::canonical::Canonicalizer;
    use crate::platform::macos::ffi;

    let canonicalizer = Canonicalizer::native();
    let count = unsafe { ffi::_dyld_image_count() };
    let mut images = Vec::with_capacity(count as usize);
    for index in 0..count {
        let header = unsafe { ffi::_dyld_get_image_header(index) };
        let Some(path) = c_string(unsafe { ffi::_dyld_get_image_name(index) }) else {
            continue;
        };
        if header.is_null() {
            continue;
        }
        images.push(LoadedImageInfo {
            index,
            path,
            header: canonicalizer.canonicalize(Address::from_ptr(header)),
            slide: unsafe { ffi::_dyld_get_image_vmaddr_slide(index) } as i64,
        });
    }
    Ok(images)
}

#[cfg(not(target_os = "macos"))]
pub fn loaded_images() -> Result<Vec<LoadedImageInfo>>
{
    Err(crate::error::ProbeError::Unsupported("image enumeration requires dyld"))
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_missing_capabilities_are_conservative()
    {
        let none = DyldCapabilities::none();
        assert!(!none.can_query_shared_cache());
        assert!(!none.shared_cache_contains("/usr/lib/libobjc.A.dylib"));
        assert_eq!(none.image_path_containing(Address::new(0x1000)), None);
        assert_eq!(none.shared_cache_path(), None);
        assert_eq!(none.shared_cache_install_names("/System/Library/dyld/dyld_shared_cache_arm64e"), None);
    }

    #[test]
    fn test_interior_nul_is_not_in_cache()
    {
        assert!(!DyldCapabilities::get().shared_cache_contains("/usr/lib/\0libobjc.A.dylib"));
    }

    #[cfg(target_os = "macos")]
    #[test]
    fn test_loaded_images_include_libsystem()
    {
        let images = loaded_images().unwrap();
        assert!(!images.is_empty());
        assert!(images.iter().any(|image| image.path.contains("libSystem")));
    }

    #[cfg(target_os = "macos")]
    #[test]
    fn test_shared_cache_lists_libsystem()
    {
        let caps = DyldCapabilities::get();
        let Some(cache) = caps.shared_cache_path() else {
            return;
        };
        if let Some(names) = caps.shared_cache_install_names(&cache) {
            assert!(names.iter().any(|name| name.contains("libSystem")), "{} names", names.len());
        }
        assert_eq!(caps.shared_cache_install_names("/nonexistent/dyld_shared_cache"), None);
    }

    #[cfg(target_os = "macos")]
    #[test]
    fn test_image_containing_own_code()
    {
        let here = Address::new(test_image_containing_own_code as usize as u64);
        if let Some(path) = DyldCapabilities::get().image_path_containing(here) {
            assert!(!path.is_empty());
        }
    }
}
