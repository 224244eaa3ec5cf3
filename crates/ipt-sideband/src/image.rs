//! Memory images built from mmap records.

use parking_lot::{RwLock, RwLockReadGuard};

/// A file range mapped into memory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Section {
    pub filename: String,
    /// Offset into the file.
    pub offset: u64,
    pub size: u64,
    /// Load address.
    pub vaddr: u64,
}

impl Section {
    /// One past the last mapped address.
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.vaddr.saturating_add(self.size)
    }

    #[must_use]
    pub const fn contains(&self, vaddr: u64) -> bool {
        self.vaddr <= vaddr && vaddr < self.end()
    }

    const fn overlaps(&self, begin: u64, end: u64) -> bool {
        self.vaddr < end && begin < self.end()
    }

    /// The part of the section in `[begin, end)`, if any.
    fn clip(&self, begin: u64, end: u64) -> Option<Self> {
        let begin = begin.max(self.vaddr);
        let end = end.min(self.end());
        (begin < end).then(|| Self {
            filename: self.filename.clone(),
            offset: self.offset.saturating_add(begin - self.vaddr),
            size: end - begin,
            vaddr: begin,
        })
    }
}

/// The sections of one address space.
///
/// Sections never overlap. A new section replaces whatever was mapped at its
/// addresses before; older sections keep the parts outside of it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Image {
    sections: Vec<Section>,
}

impl Image {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            sections: Vec::new(),
        }
    }

    /// Map a section, evicting overlapped parts of existing ones.
    pub fn add(&mut self, section: Section) {
        if section.size == 0 || self.sections.contains(&section) {
            return;
        }

        let (begin, end) = (section.vaddr, section.end());
        let mut kept = Vec::with_capacity(self.sections.len() + 2);
        for old in self.sections.drain(..) {
            if !old.overlaps(begin, end) {
                kept.push(old);
                continue;
            }

            tracing::trace!(filename = %old.filename, vaddr = old.vaddr, "section evicted");
            kept.extend(old.clip(old.vaddr, begin));
            kept.extend(old.clip(end, old.end()));
        }

        kept.push(section);
        kept.sort_by_key(|section| section.vaddr);
        self.sections = kept;
    }

    /// Map every section of `other`.
    pub fn copy_from(&mut self, other: &Self) {
        for section in &other.sections {
            self.add(section.clone());
        }
    }

    /// The section mapped at `vaddr`.
    #[must_use]
    pub fn find(&self, vaddr: u64) -> Option<&Section> {
        self.sections.iter().find(|section| section.contains(vaddr))
    }

    /// Sections in address order.
    #[must_use]
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sections.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

/// A process and its memory image.
///
/// Contexts are shared between the registry, the correlator, and the decoder
/// that currently uses the image. Sections added while the decoder holds the
/// context are visible to it right away.
#[derive(Debug)]
pub struct ProcessContext {
    pid: u32,
    name: String,
    image: RwLock<Image>,
}

impl ProcessContext {
    #[must_use]
    pub fn new(pid: u32, image: Image) -> Self {
        Self {
            pid,
            name: format!("img-{pid:x}"),
            image: RwLock::new(image),
        }
    }

    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.pid
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn image(&self) -> RwLockReadGuard<'_, Image> {
        self.image.read()
    }

    pub fn add_section(&self, section: Section) {
        self.image.write().add(section);
    }

    /// Map every section of `parent` into this context.
    pub fn copy_image_from(&self, parent: &Self) {
        if std::ptr::eq(self, parent) {
            return;
        }
        let source = parent.image.read().clone();
        self.image.write().copy_from(&source);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(filename: &str, vaddr: u64, size: u64) -> Section {
        Section {
            filename: filename.into(),
            offset: 0,
            size,
            vaddr,
        }
    }

    #[test]
    fn test_overlap_splits_older_section() {
        let mut image = Image::new();
        image.add(section("a", 0x1000, 0x3000));
        image.add(section("b", 0x2000, 0x1000));

        let sections = image.sections();
        assert_eq!(sections.len(), 3);
        assert_eq!(sections[0], section("a", 0x1000, 0x1000));
        assert_eq!(sections[1], section("b", 0x2000, 0x1000));
        assert_eq!(sections[2], Section {
            filename: "a".into(),
            offset: 0x2000,
            size: 0x1000,
            vaddr: 0x3000,
        });
    }

    #[test]
    fn test_split_near_max_offset_saturates() {
        let mut image = Image::new();
        image.add(Section {
            filename: "huge".into(),
            offset: u64::MAX,
            size: 0x2000,
            vaddr: 0x1000,
        });
        image.add(section("b", 0x1000, 0x1000));

        let sections = image.sections();
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0], section("b", 0x1000, 0x1000));
        assert_eq!(sections[1], Section {
            filename: "huge".into(),
            offset: u64::MAX,
            size: 0x1000,
            vaddr: 0x2000,
        });
    }

    #[test]
    fn test_full_overlap_evicts() {
        let mut image = Image::new();
        image.add(section("a", 0x1000, 0x1000));
        image.add(section("b", 0x0, 0x4000));

        assert_eq!(image.len(), 1);
        assert_eq!(image.find(0x1800).unwrap().filename, "b");
    }

    #[test]
    fn test_duplicate_add_is_ignored() {
        let mut image = Image::new();
        image.add(section("a", 0x1000, 0x1000));
        image.add(section("a", 0x1000, 0x1000));
        image.add(section("empty", 0x5000, 0));

        assert_eq!(image.len(), 1);
        assert!(image.find(0x5000).is_none());
    }

    #[test]
    fn test_copy_image_from_parent() {
        let parent = ProcessContext::new(0x10, Image::new());
        parent.add_section(section("libc", 0x7000, 0x1000));
        let child = ProcessContext::new(0x11, Image::new());

        child.copy_image_from(&parent);
        child.copy_image_from(&child);

        assert_eq!(child.name(), "img-11");
        assert_eq!(child.image().sections(), parent.image().sections());
    }
}
