use std::cmp::Ordering;
use std::io::{Read, Write};
use std::sync::{Arc, Once};

use rand::Rng;
use shuffle_io::compare::Pair;
use shuffle_io::{BinaryRecord, CodecKind, CodecRegistry, ShuffleResult, ValueCodec, default_comparator};

/// Big-endian u16, so an external encoding is told apart from the built-in one.
struct BigEndianU16;

impl ValueCodec<u16> for BigEndianU16 {
    fn write(&self, value: &u16, writer: &mut dyn Write) -> ShuffleResult<()> {
        writer.write_all(&value.to_be_bytes())?;
        Ok(())
    }

    fn read(&self, reader: &mut dyn Read) -> ShuffleResult<u16> {
        let mut buf = [0u8; 2];
        reader.read_exact(&mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }
}

static REGISTER: Once = Once::new();

// Every test in this binary sees u16 encoded big-endian.
fn register_big_endian_u16() {
    REGISTER.call_once(|| CodecRegistry::global().register::<u16>(Arc::new(BigEndianU16)));
}

fn encode_resolved<T: BinaryRecord>(value: &T) -> Vec<u8> {
    let mut out = Vec::new();
    CodecRegistry::global()
        .resolve::<T>()
        .write(value, &mut out)
        .unwrap();
    out
}

#[test]
fn test_composites_encode_elements_with_registered_codec() {
    register_big_endian_u16();
    assert_eq!(CodecRegistry::global().kind_of::<u16>(), CodecKind::External);
    assert_eq!(encode_resolved(&1u16), vec![0, 1]);

    assert_eq!((1u16, 1u16).to_bytes().unwrap(), vec![0, 1, 0, 1]);
    assert_eq!((258u16, 7u8, 3u16).to_bytes().unwrap(), vec![1, 2, 7, 0, 3]);
    assert_eq!(vec![1u16, 2].to_bytes().unwrap(), vec![2, 0, 1, 0, 2]);
    assert_eq!(
        Pair::new(1u16, "a".to_string()).to_bytes().unwrap(),
        vec![0, 1, 1, b'a']
    );

    let encoded = (513u16, vec![1u16, 256]).to_bytes().unwrap();
    let decoded = <(u16, Vec<u16>)>::decode(&mut &encoded[..]).unwrap();
    assert_eq!(decoded, (513, vec![1, 256]));

    let mut reused = (0u16, vec![9u16, 9, 9]);
    reused.decode_into(&mut &encoded[..]).unwrap();
    assert_eq!(reused, (513, vec![1, 256]));
}

#[test]
fn test_default_comparator_follows_registered_codec() {
    register_big_endian_u16();
    let cmp = default_comparator::<u16>();
    let pairs = default_comparator::<Pair<u16, u32>>();
    let mut rng = rand::rng();
    for _ in 0..2000 {
        let (a, b): (u16, u16) = (rng.random(), rng.random());
        assert_eq!(
            cmp.compare_raw(&encode_resolved(&a), &encode_resolved(&b)).unwrap(),
            a.cmp(&b),
            "{a} vs {b}"
        );

        let (pa, pb) = (Pair::new(a, rng.random::<u32>()), Pair::new(b, rng.random::<u32>()));
        assert_eq!(
            pairs
                .compare_raw(&pa.to_bytes().unwrap(), &pb.to_bytes().unwrap())
                .unwrap(),
            a.cmp(&b)
        );
    }
    // 1 and 256 swap order under a little-endian reading of big-endian bytes.
    assert_eq!(
        cmp.compare_raw(&encode_resolved(&1u16), &encode_resolved(&256u16)).unwrap(),
        Ordering::Less
    );
}
