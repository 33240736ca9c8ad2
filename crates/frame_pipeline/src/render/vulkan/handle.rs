//! Raw handle access shared by every wrapper

use ash::vk;

/// A wrapper that owns exactly one native Vulkan handle
///
/// The handle is created in the wrapper's constructor and destroyed in its
/// `Drop`. [`raw_handle`](DeviceObject::raw_handle) hands out a copy for use in
/// other driver calls without transferring ownership.
pub trait DeviceObject {
    /// Native handle type
    type Raw: vk::Handle + Copy;

    /// The underlying native handle
    fn raw_handle(&self) -> Self::Raw;

    /// Handle value as an integer, for logging and identity checks
    fn raw_id(&self) -> u64 {
        vk::Handle::as_raw(self.raw_handle())
    }
}

/// Implement [`DeviceObject`] for a wrapper whose handle lives in a field
macro_rules! impl_device_object {
    ($wrapper:ty, $raw:ty, $field:ident) => {
        impl $crate::render::vulkan::handle::DeviceObject for $wrapper {
            type Raw = $raw;

            fn raw_handle(&self) -> $raw {
                self.$field
            }
        }
    };
}

pub(crate) use impl_device_object;
