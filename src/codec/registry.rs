//! Type-keyed codec registry.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use log::debug;
use parking_lot::RwLock;

use crate::codec::{BinaryRecord, CodecKind, RecordCodec, ValueCodec};

type ErasedCodec = Box<dyn Any + Send + Sync>;

/// Maps record types to the codec that encodes them.
///
/// Resolution for a type happens once and is cached; registering a codec for a type
/// afterwards replaces the cached resolution.
#[derive(Default)]
pub struct CodecRegistry {
    explicit: RwLock<HashMap<TypeId, ErasedCodec>>,
    resolved: RwLock<HashMap<TypeId, ErasedCodec>>,
    /// Set by the first `register`; lets lookups skip the map until then
    has_external: AtomicBool,
}

static GLOBAL: OnceLock<CodecRegistry> = OnceLock::new();

impl CodecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry used by readers and writers that are not given one.
    pub fn global() -> &'static CodecRegistry {
        GLOBAL.get_or_init(CodecRegistry::new)
    }

    /// Register an external codec for `T`; it takes precedence over `T`'s own encoding.
    pub fn register<T: 'static>(&self, codec: Arc<dyn ValueCodec<T>>) {
        let id = TypeId::of::<T>();
        debug!("Registering external codec for {}", std::any::type_name::<T>());
        self.explicit.write().insert(id, Box::new(codec));
        self.has_external.store(true, Ordering::Release);
        self.resolved.write().remove(&id);
    }

    /// The explicitly registered codec for `T`, if any.
    pub fn lookup<T: 'static>(&self) -> Option<Arc<dyn ValueCodec<T>>> {
        if !self.has_external.load(Ordering::Acquire) {
            return None;
        }
        self.explicit
            .read()
            .get(&TypeId::of::<T>())
            .and_then(|codec| codec.downcast_ref::<Arc<dyn ValueCodec<T>>>())
            .cloned()
    }

    /// The codec for `T`: the registered external codec if there is one, otherwise
    /// `T`'s own self-describing or built-in encoding.
    pub fn resolve<T: BinaryRecord>(&self) -> Arc<dyn ValueCodec<T>> {
        let id = TypeId::of::<T>();
        if let Some(codec) = self
            .resolved
            .read()
            .get(&id)
            .and_then(|codec| codec.downcast_ref::<Arc<dyn ValueCodec<T>>>())
        {
            return codec.clone();
        }

        let codec: Arc<dyn ValueCodec<T>> = match self.lookup::<T>() {
            Some(codec) => codec,
            None => Arc::new(RecordCodec::<T>::new()),
        };
        debug!(
            "Resolved {:?} codec for {}",
            codec.kind(),
            std::any::type_name::<T>()
        );
        self.resolved.write().insert(id, Box::new(codec.clone()));
        codec
    }

    /// How `T` is encoded under this registry.
    pub fn kind_of<T: BinaryRecord>(&self) -> CodecKind {
        self.resolve::<T>().kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Writable;
    use crate::error::Result;
    use crate::writable_record;
    use std::io::{Read, Write};

    #[derive(Debug, Default, PartialEq)]
    struct Counter {
        name: String,
        hits: u32,
    }

    impl Writable for Counter {
        fn write_to(&self, writer: &mut dyn Write) -> Result<()> {
            self.name.encode(writer)?;
            self.hits.encode(writer)
        }

        fn read_from(&mut self, reader: &mut dyn Read) -> Result<()> {
            self.name.decode_into(reader)?;
            self.hits = u32::decode(reader)?;
            Ok(())
        }
    }

    writable_record!(Counter);

    /// Writes u32 values big-endian, to tell it apart from the built-in codec.
    struct BigEndianU32;

    impl ValueCodec<u32> for BigEndianU32 {
        fn write(&self, value: &u32, writer: &mut dyn Write) -> Result<()> {
            writer.write_all(&value.to_be_bytes())?;
            Ok(())
        }

        fn read(&self, reader: &mut dyn Read) -> Result<u32> {
            let mut buf = [0u8; 4];
            reader.read_exact(&mut buf)?;
            Ok(u32::from_be_bytes(buf))
        }
    }

    #[test]
    fn test_resolution_order() {
        let registry = CodecRegistry::new();
        assert_eq!(registry.kind_of::<u32>(), CodecKind::BuiltIn);
        assert_eq!(registry.kind_of::<Counter>(), CodecKind::SelfDescribing);

        registry.register::<u32>(Arc::new(BigEndianU32));
        assert_eq!(registry.kind_of::<u32>(), CodecKind::External);

        let mut out = Vec::new();
        registry.resolve::<u32>().write(&1, &mut out).unwrap();
        assert_eq!(out, vec![0, 0, 0, 1]);
    }

    #[test]
    fn test_resolution_is_cached() {
        let registry = CodecRegistry::new();
        let first = registry.resolve::<String>();
        let second = registry.resolve::<String>();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_lookup_only_sees_registered_codecs() {
        let registry = CodecRegistry::new();
        assert!(registry.lookup::<u32>().is_none());
        registry.register::<u32>(Arc::new(BigEndianU32));
        assert!(registry.lookup::<u32>().is_some());
    }

    #[test]
    fn test_self_describing_read_into_reuses_instance() {
        let registry = CodecRegistry::new();
        let codec = registry.resolve::<Counter>();
        let mut out = Vec::new();
        codec
            .write(&Counter { name: "b".into(), hits: 2 }, &mut out)
            .unwrap();

        let mut record = Counter {
            name: "a-much-longer-name".into(),
            hits: 1,
        };
        codec.read_into(&mut record, &mut &out[..]).unwrap();
        assert_eq!(record, Counter { name: "b".into(), hits: 2 });
    }
}
