//! # Finalizers
//!
//! Idempotent add, remove and membership checks for a named finalizer on any
//! object that exposes its finalizer list.

use kube::Resource;

/// Get/set access to an object's finalizer list
pub trait FinalizerAccessor {
    fn finalizers(&self) -> &[String];
    fn set_finalizers(&mut self, finalizers: Vec<String>);
}

impl<K: Resource> FinalizerAccessor for K {
    fn finalizers(&self) -> &[String] {
        self.meta().finalizers.as_deref().unwrap_or_default()
    }

    fn set_finalizers(&mut self, finalizers: Vec<String>) {
        self.meta_mut().finalizers = if finalizers.is_empty() {
            None
        } else {
            Some(finalizers)
        };
    }
}

/// Manages one finalizer name
#[derive(Debug, Clone)]
pub struct FinalizerManager {
    name: String,
}

impl FinalizerManager {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append the finalizer unless it is already there
    ///
    /// Returns `true` when the list changed.
    pub fn add_to<T: FinalizerAccessor + ?Sized>(&self, object: &mut T) -> bool {
        if self.is_defined_in(object) {
            return false;
        }
        let mut finalizers = object.finalizers().to_vec();
        finalizers.push(self.name.clone());
        object.set_finalizers(finalizers);
        true
    }

    /// Remove every occurrence of the finalizer
    ///
    /// Returns `true` when the list changed.
    pub fn delete_from<T: FinalizerAccessor + ?Sized>(&self, object: &mut T) -> bool {
        if !self.is_defined_in(object) {
            return false;
        }
        let finalizers = object
            .finalizers()
            .iter()
            .filter(|f| **f != self.name)
            .cloned()
            .collect();
        object.set_finalizers(finalizers);
        true
    }

    pub fn is_defined_in<T: FinalizerAccessor + ?Sized>(&self, object: &T) -> bool {
        object.finalizers().iter().any(|f| *f == self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Holder {
        finalizers: Vec<String>,
    }

    impl FinalizerAccessor for Holder {
        fn finalizers(&self) -> &[String] {
            &self.finalizers
        }

        fn set_finalizers(&mut self, finalizers: Vec<String>) {
            self.finalizers = finalizers;
        }
    }

    #[test]
    fn test_add_is_idempotent() {
        let manager = FinalizerManager::new("test.finalizer");
        let mut holder = Holder::default();

        assert!(manager.add_to(&mut holder));
        assert!(!manager.add_to(&mut holder));
        assert_eq!(holder.finalizers, vec!["test.finalizer"]);
    }

    #[test]
    fn test_delete_keeps_other_finalizers() {
        let manager = FinalizerManager::new("test.finalizer");
        let mut holder = Holder {
            finalizers: vec!["other".to_string(), "test.finalizer".to_string()],
        };

        assert!(manager.delete_from(&mut holder));
        assert!(!manager.delete_from(&mut holder));
        assert_eq!(holder.finalizers, vec!["other"]);
        assert!(!manager.is_defined_in(&holder));
    }

    #[test]
    fn test_works_on_custom_resources() {
        let manager = FinalizerManager::new("test.finalizer");
        let mut bucket = crate::crd::Bucket::new("docs", crate::crd::BucketSpec::default());

        assert!(!manager.is_defined_in(&bucket));
        manager.add_to(&mut bucket);
        assert!(manager.is_defined_in(&bucket));
        assert_eq!(
            bucket.metadata.finalizers.as_deref(),
            Some(&["test.finalizer".to_string()][..])
        );

        manager.delete_from(&mut bucket);
        assert_eq!(bucket.metadata.finalizers, None);
    }
}
