//! Long-running operation store
//!
//! Futures live in the owning object's status, identified by
//! (resource name, service name, operation type). At most one future exists
//! per identity.

use crds::futures::{Future, FutureType, LongRunningOperations};

/// Store a future, replacing any with the same identity
pub fn set(obj: &mut dyn LongRunningOperations, future: Future) {
    let futures = obj.futures_mut();
    match futures
        .iter_mut()
        .find(|f| f.matches(&future.name, &future.service_name, future.type_))
    {
        Some(existing) => *existing = future,
        None => futures.push(future),
    }
}

/// Look up a future
pub fn get<'a>(
    obj: &'a dyn LongRunningOperations,
    name: &str,
    service: &str,
    type_: FutureType,
) -> Option<&'a Future> {
    obj.futures().iter().find(|f| f.matches(name, service, type_))
}

/// Remove a future; missing futures are ignored
pub fn delete(obj: &mut dyn LongRunningOperations, name: &str, service: &str, type_: FutureType) {
    obj.futures_mut().retain(|f| !f.matches(name, service, type_));
}

/// True when any future of `service` exists, whatever its resource or type
pub fn has_service_future(obj: &dyn LongRunningOperations, service: &str) -> bool {
    obj.futures().iter().any(|f| f.service_name == service)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Holder(Vec<Future>);

    impl LongRunningOperations for Holder {
        fn futures(&self) -> &[Future] {
            &self.0
        }
        fn futures_mut(&mut self) -> &mut Vec<Future> {
            &mut self.0
        }
    }

    fn future(name: &str, type_: FutureType, data: &str) -> Future {
        Future {
            type_,
            service_name: "publicips".to_string(),
            name: name.to_string(),
            resource_group: "rg".to_string(),
            data: data.to_string(),
        }
    }

    #[test]
    fn test_set_replaces_same_identity() {
        let mut holder = Holder::default();
        set(&mut holder, future("pip-1", FutureType::Create, "first"));
        set(&mut holder, future("pip-1", FutureType::Create, "second"));
        set(&mut holder, future("pip-1", FutureType::Delete, "delete"));

        assert_eq!(holder.0.len(), 2);
        assert_eq!(
            get(&holder, "pip-1", "publicips", FutureType::Create).map(|f| f.data.as_str()),
            Some("second")
        );
    }

    #[test]
    fn test_delete_only_matching() {
        let mut holder = Holder::default();
        set(&mut holder, future("pip-1", FutureType::Create, "a"));
        set(&mut holder, future("pip-2", FutureType::Create, "b"));

        delete(&mut holder, "pip-1", "publicips", FutureType::Create);
        delete(&mut holder, "pip-3", "publicips", FutureType::Create);

        assert!(get(&holder, "pip-1", "publicips", FutureType::Create).is_none());
        assert!(get(&holder, "pip-2", "publicips", FutureType::Create).is_some());
        assert!(has_service_future(&holder, "publicips"));
        assert!(!has_service_future(&holder, "scalesets"));
    }
}
