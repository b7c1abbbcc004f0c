use super::align_up;

/// What a [`LinearAllocator`] asks its owner for when the current page is
/// exhausted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageRequest {
    pub size: u64,
    /// Large pages hold a single oversize allocation and are freed on their
    /// own instead of being recycled as regular pages.
    pub large: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinearAllocation {
    /// The page index returned by the owner's page request.
    pub page: usize,
    pub offset: u64,
    pub large: bool,
}

/// A bump allocator over a sequence of fixed-size pages.
///
/// Allocations either fit in the current page or cause a new page to be
/// requested from the owner. Individual allocations are never freed; the owner
/// retires whole pages once the GPU has finished with them and calls
/// [`LinearAllocator::reset`].
#[derive(Debug)]
pub struct LinearAllocator {
    name: String,
    page_size: u64,
    current_page: Option<usize>,
    bytes_allocated: u64,
}

impl LinearAllocator {
    pub fn new(name: impl Into<String>, page_size: u64) -> Self {
        Self {
            name: name.into(),
            page_size,
            current_page: None,
            bytes_allocated: 0,
        }
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn current_page(&self) -> Option<usize> {
        self.current_page
    }

    /// Bytes used in the current page.
    pub fn bytes_allocated(&self) -> u64 {
        self.bytes_allocated
    }

    /// Returns true if the allocation would fit in the current page without
    /// requesting a new one.
    pub fn can_fit(&self, size: u64, align: u64) -> bool {
        self.current_page.is_some() && align_up(self.bytes_allocated, align) + size <= self.page_size
    }

    /// Allocates `size` bytes. `request_page` returns the index of the page
    /// to use and whether it was freshly created.
    pub fn allocate<E, F>(&mut self, size: u64, align: u64, request_page: F) -> Result<LinearAllocation, E>
    where
        F: FnOnce(PageRequest) -> Result<(usize, bool), E>,
    {
        if size > self.page_size {
            let (page, is_new) = request_page(PageRequest { size, large: true })?;

            if is_new {
                log::trace!("{} creates new large page; size {}", self.name, size);
            }

            return Ok(LinearAllocation {
                page,
                offset: 0,
                large: true,
            });
        }

        let mut offset = align_up(self.bytes_allocated, align);

        let page = match self.current_page {
            Some(page) if offset + size <= self.page_size => page,
            _ => {
                let (page, is_new) = request_page(PageRequest {
                    size: self.page_size,
                    large: false,
                })?;

                if is_new {
                    log::trace!("{} creates new page; size {}", self.name, self.page_size);
                }

                self.current_page = Some(page);
                offset = 0;
                page
            }
        };

        self.bytes_allocated = offset + size;

        Ok(LinearAllocation {
            page,
            offset,
            large: false,
        })
    }

    /// Forgets the current page. The next allocation requests a new one.
    pub fn reset(&mut self) {
        self.current_page = None;
        self.bytes_allocated = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_and_large_pages() {
        let mut linear = LinearAllocator::new("test", 1024);
        let mut requests = Vec::new();
        let mut next_page = 0;

        let mut alloc = |linear: &mut LinearAllocator, size, align| {
            linear
                .allocate::<(), _>(size, align, |request| {
                    requests.push(request);
                    next_page += 1;
                    Ok((next_page - 1, true))
                })
                .unwrap()
        };

        let a = alloc(&mut linear, 100, 256);
        let b = alloc(&mut linear, 100, 256);
        assert_eq!((a.page, a.offset), (0, 0));
        assert_eq!((b.page, b.offset), (0, 256));
        assert!(linear.can_fit(500, 256));
        assert!(!linear.can_fit(600, 256));

        let c = alloc(&mut linear, 800, 256);
        assert_eq!((c.page, c.offset), (1, 0));

        let big = alloc(&mut linear, 4096, 256);
        assert!(big.large);
        assert_eq!(big.offset, 0);

        // a large page does not disturb the current page
        let d = alloc(&mut linear, 16, 16);
        assert_eq!((d.page, d.offset), (1, 800));

        linear.reset();
        let e = alloc(&mut linear, 16, 16);
        assert_eq!((e.page, e.offset), (3, 0));

        drop(alloc);
        assert_eq!(
            requests,
            vec![
                PageRequest { size: 1024, large: false },
                PageRequest { size: 1024, large: false },
                PageRequest { size: 4096, large: true },
                PageRequest { size: 1024, large: false },
            ]
        );
    }
}
