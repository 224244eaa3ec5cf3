//! Process contexts by pid.

use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::image::{Image, ProcessContext};

/// A registry shared by several correlators, one per cpu.
pub type SharedRegistry = Arc<Mutex<ContextRegistry>>;

/// All known processes, plus the kernel image every new process starts from.
#[derive(Debug, Default)]
pub struct ContextRegistry {
    contexts: HashMap<u32, Arc<ProcessContext>>,
    kernel: Option<Image>,
}

impl ContextRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_kernel_image(mut self, image: Image) -> Self {
        self.kernel = Some(image);
        self
    }

    #[must_use]
    pub fn shared(self) -> SharedRegistry {
        Arc::new(Mutex::new(self))
    }

    /// Replace the kernel image, returning the previous one.
    ///
    /// Existing contexts keep their copy of the old image.
    pub fn set_kernel_image(&mut self, image: Image) -> Option<Image> {
        self.kernel.replace(image)
    }

    #[must_use]
    pub const fn kernel_image(&self) -> Option<&Image> {
        self.kernel.as_ref()
    }

    #[must_use]
    pub fn by_pid(&self, pid: u32) -> Option<Arc<ProcessContext>> {
        self.contexts.get(&pid).cloned()
    }

    /// The context of `pid`, created from the kernel image if it is new.
    ///
    /// The flag tells whether the context was created.
    pub fn get_or_create(&mut self, pid: u32) -> (Arc<ProcessContext>, bool) {
        if let Some(context) = self.contexts.get(&pid) {
            return (Arc::clone(context), false);
        }

        let image = self.kernel.clone().unwrap_or_default();
        let context = Arc::new(ProcessContext::new(pid, image));
        self.contexts.insert(pid, Arc::clone(&context));
        tracing::trace!(pid, "process context created");
        (context, true)
    }

    /// Forget `pid`.
    ///
    /// Holders of the context keep it alive until they switch away.
    pub fn remove_by_pid(&mut self, pid: u32) -> Option<Arc<ProcessContext>> {
        self.contexts.remove(&pid)
    }

    pub fn clear(&mut self) {
        self.contexts.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Section;

    fn kernel() -> Image {
        let mut image = Image::new();
        image.add(Section {
            filename: "vmlinux".into(),
            offset: 0,
            size: 0x1000,
            vaddr: 0xffff_ffff_8100_0000,
        });
        image
    }

    #[test]
    fn test_get_or_create_copies_kernel() {
        let mut registry = ContextRegistry::new().with_kernel_image(kernel());

        let (context, created) = registry.get_or_create(0x2a);
        assert!(created);
        assert_eq!(context.name(), "img-2a");
        assert_eq!(context.image().len(), 1);

        let (again, created) = registry.get_or_create(0x2a);
        assert!(!created);
        assert!(Arc::ptr_eq(&context, &again));
    }

    #[test]
    fn test_removed_context_outlives_registry_entry() {
        let mut registry = ContextRegistry::new();
        let (context, _) = registry.get_or_create(1);

        let removed = registry.remove_by_pid(1).unwrap();
        assert!(Arc::ptr_eq(&context, &removed));
        assert!(registry.by_pid(1).is_none());
        assert!(registry.is_empty());

        let (fresh, created) = registry.get_or_create(1);
        assert!(created);
        assert!(!Arc::ptr_eq(&context, &fresh));
    }

    #[test]
    fn test_kernel_image_last_wins() {
        let mut registry = ContextRegistry::new().with_kernel_image(Image::new());
        let previous = registry.set_kernel_image(kernel());

        assert_eq!(previous, Some(Image::new()));
        assert_eq!(registry.kernel_image().map(Image::len), Some(1));
    }
}
