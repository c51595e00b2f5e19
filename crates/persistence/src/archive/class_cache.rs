use std::collections::HashMap;

use crate::archive::host::ObjectHost;
use crate::persistence_types::ClassPath;

/// Memoizes "does this class (or any ancestor) have save-flagged fields".
///
/// Every class visited during a walk is cached, so asking about a sibling
/// class only walks the part of the hierarchy that is new.
#[derive(Debug, Default, Clone)]
pub struct ClassCache {
    cache: HashMap<ClassPath, bool>,
}

impl ClassCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }

    pub fn has_persistable_fields<H: ObjectHost + ?Sized>(
        &mut self,
        host: &H,
        class: &ClassPath,
    ) -> bool {
        let mut chain = Vec::new();
        let mut current = Some(class.clone());
        let mut result = false;

        while let Some(c) = current {
            if let Some(&cached) = self.cache.get(&c) {
                result = cached;
                break;
            }
            if host.class_declares_save_fields(&c) {
                chain.push(c);
                result = true;
                break;
            }
            current = host.super_class(&c);
            chain.push(c);
        }

        // Everything below a class with fields inherits them; everything walked
        // without finding any has none.
        for c in chain {
            self.cache.insert(c, result);
        }
        result
    }
}
