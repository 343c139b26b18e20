//! Round-trip matrix over whole object graphs: identity preservation,
//! cycles, enums, boxed primitives, struct mode.

use std::rc::Rc;
use std::sync::Arc;

use graph_pack::{
    deep_eq, ClassDef, Config, FieldDef, FieldType, ObjectReader, ObjectWriter, Value,
};

fn base_config() -> Config {
    let conf = Config::new();
    conf.define_class(
        ClassDef::new("Point")
            .field(FieldDef::new("x", FieldType::Int))
            .field(FieldDef::new("y", FieldType::Int)),
    );
    conf.define_class(
        ClassDef::new("Node")
            .field(FieldDef::new("name", FieldType::Object(Some(Arc::from("String")))))
            .field(FieldDef::new("next", FieldType::Object(Some(Arc::from("Node"))))),
    );
    conf.define_class(ClassDef::new_enum("Color", ["GREEN", "BLUE", "RED"]));
    conf
}

fn roundtrip(conf: &Arc<Config>, value: &Value) -> Value {
    let mut writer = ObjectWriter::new(conf.clone());
    let bytes = writer.write_object(value).expect("encode");
    let mut reader = ObjectReader::new(conf.clone(), &bytes);
    reader.read_object().expect("decode")
}

#[test]
fn null_is_one_byte() {
    let conf = Arc::new(base_config());
    let mut writer = ObjectWriter::new(conf.clone());
    let bytes = writer.write_object(&Value::Null).unwrap();
    assert_eq!(bytes.len(), 1);
    let mut reader = ObjectReader::new(conf, &bytes);
    assert!(reader.read_object().unwrap().is_null());
}

#[test]
fn primitives_roundtrip() {
    let conf = Arc::new(base_config());
    for v in [
        Value::Bool(true),
        Value::Bool(false),
        Value::Int(0),
        Value::Int(-42),
        Value::Int(i32::MAX),
        Value::Long(1),
        Value::Long(i64::MIN),
        Value::Byte(-7),
        Value::Short(300),
        Value::Char(0x2603),
        Value::Float(1.25),
        Value::Double(-0.5),
        Value::str("hello, world"),
        Value::str(""),
    ] {
        let back = roundtrip(&conf, &v);
        assert!(deep_eq(&v, &back), "roundtrip failed for {v:?}");
    }
}

#[test]
fn boxed_booleans_are_one_byte() {
    let conf = Arc::new(base_config());
    let mut writer = ObjectWriter::new(conf.clone());
    assert_eq!(writer.write_object(&Value::Bool(true)).unwrap().len(), 1);
    assert_eq!(writer.write_object(&Value::Bool(false)).unwrap().len(), 1);
}

#[test]
fn plain_object_roundtrip() {
    let conf = Arc::new(base_config());
    let point = conf.new_object("Point").unwrap();
    point.borrow_mut().set("x", Value::Int(12)).unwrap();
    point.borrow_mut().set("y", Value::Int(-30000)).unwrap();
    let back = roundtrip(&conf, &Value::Object(point.clone()));
    assert!(deep_eq(&Value::Object(point), &back));
}

#[test]
fn shared_reference_decodes_to_one_node() {
    let conf = Arc::new(base_config());
    let point = conf.new_object("Point").unwrap();
    point.borrow_mut().set("x", Value::Int(1)).unwrap();
    let list = Value::ref_array(
        "Point",
        vec![Value::Object(point.clone()), Value::Object(point)],
    );

    let back = roundtrip(&conf, &list);
    let arr = back.as_array().unwrap().borrow();
    let (a, b) = match &*arr {
        graph_pack::ArrayData::Ref { items, .. } => (items[0].clone(), items[1].clone()),
        _ => panic!("expected reference array"),
    };
    let (a, b) = (a.as_object().unwrap().clone(), b.as_object().unwrap().clone());
    assert!(Rc::ptr_eq(&a, &b), "identity must be preserved");
}

#[test]
fn second_occurrence_is_a_short_back_reference() {
    let conf = Arc::new(base_config());
    let point = conf.new_object("Point").unwrap();
    let once = Value::ref_array("Point", vec![Value::Object(point.clone())]);
    let twice = Value::ref_array(
        "Point",
        vec![Value::Object(point.clone()), Value::Object(point)],
    );
    let mut writer = ObjectWriter::new(conf.clone());
    let once_len = writer.write_object(&once).unwrap().len();
    let twice_len = writer.write_object(&twice).unwrap().len();
    // The second element is a tag plus a small varint position.
    assert!(twice_len <= once_len + 3, "handle took {}", twice_len - once_len);
}

#[test]
fn shared_strings_keep_identity() {
    let conf = Arc::new(base_config());
    let s = Rc::new("hi".to_string());
    let list = Value::ref_array(
        "Object",
        vec![Value::Str(s.clone()), Value::Str(s)],
    );
    let back = roundtrip(&conf, &list);
    let arr = back.as_array().unwrap().borrow();
    match &*arr {
        graph_pack::ArrayData::Ref { items, .. } => match (&items[0], &items[1]) {
            (Value::Str(a), Value::Str(b)) => assert!(Rc::ptr_eq(a, b)),
            other => panic!("expected strings, got {other:?}"),
        },
        _ => panic!("expected reference array"),
    }
}

#[test]
fn self_cycle_closes() {
    let conf = Arc::new(base_config());
    let node = conf.new_object("Node").unwrap();
    node.borrow_mut().set("name", Value::str("loop")).unwrap();
    node.borrow_mut()
        .set("next", Value::Object(node.clone()))
        .unwrap();

    let back = roundtrip(&conf, &Value::Object(node));
    let obj = back.as_object().unwrap().clone();
    let next = obj.borrow().get("next").unwrap().clone();
    assert!(Rc::ptr_eq(&obj, next.as_object().unwrap()));
}

#[test]
fn two_node_cycle_closes() {
    let conf = Arc::new(base_config());
    let a = conf.new_object("Node").unwrap();
    let b = conf.new_object("Node").unwrap();
    a.borrow_mut().set("name", Value::str("a")).unwrap();
    b.borrow_mut().set("name", Value::str("b")).unwrap();
    a.borrow_mut().set("next", Value::Object(b.clone())).unwrap();
    b.borrow_mut().set("next", Value::Object(a.clone())).unwrap();

    let back = roundtrip(&conf, &Value::Object(a));
    let a2 = back.as_object().unwrap().clone();
    let b2 = a2.borrow().get("next").unwrap().clone();
    let b2 = b2.as_object().unwrap().clone();
    let around = b2.borrow().get("next").unwrap().clone();
    assert!(Rc::ptr_eq(&a2, around.as_object().unwrap()));
    assert_eq!(b2.borrow().get("name").unwrap().as_str(), Some("b"));
}

#[test]
fn enum_by_ordinal() {
    let conf = Arc::new(base_config());
    let red = conf.enum_value("Color", "RED").unwrap();
    let mut writer = ObjectWriter::new(conf.clone());
    let bytes = writer.write_object(&red).unwrap();
    // Ordinal 2 is the last byte of the emission.
    assert_eq!(*bytes.last().unwrap(), 2);

    let mut reader = ObjectReader::new(conf, &bytes);
    let back = reader.read_object().unwrap();
    match back {
        Value::Enum(e) => {
            assert_eq!(e.ordinal, 2);
            assert_eq!(e.name(), "RED");
        }
        other => panic!("expected enum, got {other:?}"),
    }
}

#[test]
fn enum_by_name_in_cross_language_mode() {
    let mut conf = base_config();
    conf.set_cross_language(true);
    let conf = Arc::new(conf);
    let blue = conf.enum_value("Color", "BLUE").unwrap();
    let back = roundtrip(&conf, &blue);
    match back {
        Value::Enum(e) => assert_eq!(e.name(), "BLUE"),
        other => panic!("expected enum, got {other:?}"),
    }
}

#[test]
fn struct_mode_inlines_shared_references() {
    let mut conf = base_config();
    conf.set_struct_mode(true);
    let conf = Arc::new(conf);

    let point = conf.new_object("Point").unwrap();
    point.borrow_mut().set("x", Value::Int(9)).unwrap();
    let list = Value::ref_array(
        "Point",
        vec![Value::Object(point.clone()), Value::Object(point.clone())],
    );
    let back = roundtrip(&conf, &list);
    let arr = back.as_array().unwrap().borrow();
    match &*arr {
        graph_pack::ArrayData::Ref { items, .. } => {
            let a = items[0].as_object().unwrap();
            let b = items[1].as_object().unwrap();
            assert!(!Rc::ptr_eq(a, b), "struct mode must not share");
            assert!(deep_eq(&items[0], &Value::Object(point.clone())));
            assert!(deep_eq(&items[1], &Value::Object(point.clone())));
        }
        _ => panic!("expected reference array"),
    }
}

#[test]
fn repeated_class_uses_prediction_code() {
    let conf = Arc::new(base_config());
    let mk = || {
        let p = conf.new_object("Point").unwrap();
        Value::Object(p)
    };
    let one = Value::ref_array("Object", vec![mk()]);
    let three = Value::ref_array("Object", vec![mk(), mk(), mk()]);
    let mut writer = ObjectWriter::new(conf.clone());
    let one_len = writer.write_object(&one).unwrap().len();
    let three_len = writer.write_object(&three).unwrap().len();
    // After the first element ships the class name, later distinct
    // instances open with a one-byte prediction tag and a tiny body.
    let per_extra = (three_len - one_len) / 2;
    assert!(per_extra <= 3, "expected compact repeats, got {per_extra}");

    let back = roundtrip(&conf, &three);
    assert!(deep_eq(&three, &back));
}

#[test]
fn unknown_class_on_decode_is_an_error() {
    let conf = Arc::new(base_config());
    let point = conf.new_object("Point").unwrap();
    let mut writer = ObjectWriter::new(conf.clone());
    let bytes = writer.write_object(&Value::Object(point)).unwrap();

    // A receiver that never registered Point cannot decode it.
    let other = Arc::new(Config::new());
    let mut reader = ObjectReader::new(other, &bytes);
    assert!(reader.read_object().is_err());
}

#[test]
fn truncated_stream_is_an_error() {
    let conf = Arc::new(base_config());
    let point = conf.new_object("Point").unwrap();
    point.borrow_mut().set("x", Value::Int(100000)).unwrap();
    let mut writer = ObjectWriter::new(conf.clone());
    let bytes = writer.write_object(&Value::Object(point)).unwrap();

    for cut in 1..bytes.len() {
        let mut reader = ObjectReader::new(conf.clone(), &bytes[..cut]);
        assert!(
            reader.read_object().is_err(),
            "prefix of {cut} bytes decoded successfully"
        );
    }
}
