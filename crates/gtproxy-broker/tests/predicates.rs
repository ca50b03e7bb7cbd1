//! Predicate operators against decoded packets.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use gtproxy_broker::interest::{
    compile_interests, Clause, ColSelector, Field, Interest, InterestKind, Literal, Op, RowSelector,
    Subject, TankField,
};
use gtproxy_core::protocol::{
    Direction, NetPacket, NetType, StrKv, TankFlags, TankPacket, TankType, Variant, VariantValue,
};

fn tank_subject() -> NetPacket {
    let mut t = TankPacket::new(TankType::SendParticleEffect);
    t.net_id = 42;
    t.target_net_id = -1;
    t.float_var = 1.5;
    t.vector_x = 100.00002;
    t.int_x = 12;
    t.flags = TankFlags::FACING_LEFT | TankFlags::STANDING;
    t.set_extended(&b"\x00\x01hello\x00"[..]);
    NetPacket::tank(t)
}

fn call_subject() -> NetPacket {
    let mut v = Variant::new();
    v.push("OnConsoleMessage")
        .push("`oWelcome back")
        .push(VariantValue::Vec2(3.0, 4.0))
        .push(7u32);
    let mut t = TankPacket::new(TankType::CallFunction);
    t.set_extended(v.encode().unwrap());
    NetPacket::tank(t)
}

fn table_subject() -> NetPacket {
    let mut table = StrKv::new();
    table
        .append(["action", "dialog_return"])
        .append(["dialog_name", "drop_item"])
        .append(["itemID", "2", ""])
        .append(["count", " 150"]);
    NetPacket::table(NetType::GenericText, table)
}

fn eval(packet: &NetPacket, clause: Clause) -> bool {
    clause.eval(&Subject::new(packet))
}

fn tank(field: TankField, op: Op, value: Literal) -> Clause {
    Clause::new(Field::Tank(field), op, value)
}

fn cell(row: RowSelector, col: ColSelector, op: Op, value: Literal) -> Clause {
    Clause::new(Field::Table { row, col }, op, value)
}

#[test]
fn tank_numeric_fields() {
    let p = tank_subject();
    assert!(eval(&p, tank(TankField::NetId, Op::Eq, Literal::U32(42))));
    assert!(!eval(&p, tank(TankField::NetId, Op::Eq, Literal::U32(41))));
    assert!(eval(&p, tank(TankField::NetId, Op::Neq, Literal::U32(41))));
    assert!(eval(&p, tank(TankField::NetId, Op::Gt, Literal::I32(-5))));
    assert!(eval(&p, tank(TankField::NetId, Op::Lte, Literal::U32(42))));
    assert!(eval(&p, tank(TankField::TargetNetId, Op::Lt, Literal::I32(0))));
    assert!(eval(&p, tank(TankField::IntX, Op::Gte, Literal::F32(11.5))));
    assert!(eval(
        &p,
        tank(TankField::Type, Op::Eq, Literal::U32(TankType::SendParticleEffect as u32))
    ));
}

#[test]
fn float_equality_with_tolerance() {
    let p = tank_subject();
    assert!(eval(&p, tank(TankField::FloatVar, Op::Eq, Literal::F32(1.5))));
    assert!(!eval(&p, tank(TankField::VectorX, Op::Eq, Literal::F32(100.0))));
    assert!(eval(&p, tank(TankField::VectorX, Op::EqEps, Literal::F32(100.0))));
    assert!(!eval(
        &p,
        tank(TankField::FloatVar, Op::EqEps, Literal::F32(1.4))
    ));
    assert!(eval(
        &p,
        tank(TankField::FloatVar, Op::EqEps, Literal::F32(1.4)).with_eps(0.2)
    ));
}

#[test]
fn flag_bits() {
    let p = tank_subject();
    let mask = TankFlags::FACING_LEFT.bits();
    assert!(eval(&p, tank(TankField::Flags, Op::BitTest, Literal::U32(mask))));
    assert!(eval(
        &p,
        tank(TankField::Flags, Op::BitTest, Literal::U32(mask | TankFlags::EXTENDED.bits()))
    ));
    assert!(!eval(
        &p,
        tank(TankField::Flags, Op::BitTest, Literal::U32(TankFlags::FIRE_DAMAGE.bits()))
    ));
}

#[test]
fn extended_tail_as_bytes() {
    let p = tank_subject();
    assert!(eval(&p, tank(TankField::ExtendedLen, Op::Eq, Literal::U32(8))));
    assert!(eval(
        &p,
        tank(TankField::ExtendedData, Op::Contains, Literal::Str("hello".into()))
    ));
    assert!(eval(
        &p,
        tank(TankField::ExtendedData, Op::StartsWith, Literal::Bytes(vec![0, 1]))
    ));
    assert!(eval(
        &p,
        tank(TankField::ExtendedData, Op::EndsWith, Literal::Bytes(vec![b'o', 0]))
    ));
}

#[test]
fn tank_fields_never_match_table_packets() {
    let p = table_subject();
    assert!(!eval(&p, tank(TankField::NetId, Op::Eq, Literal::U32(0))));
    assert!(!eval(&p, tank(TankField::NetId, Op::Neq, Literal::U32(0))));
}

#[test]
fn table_cells_by_key_index_and_value() {
    let p = table_subject();
    let key = |k: &str| RowSelector::Key(k.into());
    assert!(eval(
        &p,
        cell(key("dialog_name"), ColSelector::Absolute(1), Op::Eq, Literal::Str("drop_item".into()))
    ));
    assert!(eval(
        &p,
        cell(RowSelector::Index(0), ColSelector::Absolute(0), Op::Eq, Literal::Str("action".into()))
    ));
    assert!(eval(
        &p,
        cell(
            RowSelector::KeyAny("dialog_return".into()),
            ColSelector::Relative(-1),
            Op::Eq,
            Literal::Str("action".into())
        )
    ));
    assert!(eval(
        &p,
        cell(key("itemID"), ColSelector::Absolute(2), Op::Eq, Literal::Str(String::new()))
    ));
    assert!(!eval(
        &p,
        cell(key("itemID"), ColSelector::Absolute(3), Op::Eq, Literal::Str(String::new()))
    ));
    assert!(!eval(
        &p,
        cell(key("missing"), ColSelector::Absolute(0), Op::Neq, Literal::Str("x".into()))
    ));
}

#[test]
fn table_cells_compare_as_numbers() {
    let p = table_subject();
    let count = || RowSelector::Key("count".into());
    assert!(eval(&p, cell(count(), ColSelector::Absolute(1), Op::Gt, Literal::U32(100))));
    assert!(eval(&p, cell(count(), ColSelector::Absolute(1), Op::Eq, Literal::U32(150))));
    assert!(!eval(
        &p,
        cell(
            RowSelector::Key("action".into()),
            ColSelector::Absolute(1),
            Op::Gt,
            Literal::U32(0)
        )
    ));
    // Neither equal nor different when the cell is not a number.
    assert!(!eval(
        &p,
        cell(
            RowSelector::Key("action".into()),
            ColSelector::Absolute(1),
            Op::Neq,
            Literal::U32(0)
        )
    ));
}

#[test]
fn call_function_arguments() {
    let p = call_subject();
    assert!(eval(&p, Clause::new(Field::Variant(0), Op::Like, Literal::Str("On%Message".into()))));
    assert!(eval(&p, Clause::new(Field::Variant(1), Op::StartsWith, Literal::Str("`o".into()))));
    assert!(eval(&p, Clause::new(Field::Variant(2), Op::Eq, Literal::Vec2([3.0, 4.0]))));
    assert!(eval(&p, Clause::new(Field::Variant(3), Op::Gte, Literal::U32(7))));
    assert!(!eval(&p, Clause::new(Field::Variant(9), Op::Eq, Literal::U32(7))));
    assert!(!eval(
        &tank_subject(),
        Clause::new(Field::Variant(0), Op::Like, Literal::Str("%".into()))
    ));
}

#[test]
fn interest_combines_direction_and_clauses() {
    let p = tank_subject();
    let interest = Interest::new(1, InterestKind::Net(NetType::TankPacket))
        .with_direction(Direction::ServerToClient)
        .with_clause(tank(TankField::NetId, Op::Eq, Literal::U32(42)))
        .with_clause(tank(TankField::IntX, Op::Eq, Literal::I32(12)));
    let s = Subject::new(&p);
    assert!(interest.accepts(&s, Direction::ServerToClient));
    assert!(!interest.accepts(&s, Direction::ClientToServer));

    let stricter = interest.clone().with_clause(tank(TankField::IntX, Op::Lt, Literal::I32(0)));
    assert!(!stricter.accepts(&s, Direction::ServerToClient));

    let either = Interest::new(2, InterestKind::Net(NetType::TankPacket));
    assert!(either.accepts(&s, Direction::ClientToServer));
    assert!(either.accepts(&s, Direction::ServerToClient));
}

#[test]
fn interests_compile_from_json() {
    let raw = serde_json::json!([{
        "id": 5,
        "kind": { "tank": "CALL_FUNCTION" },
        "priority": 3,
        "direction": "server_to_client",
        "predicate": [
            { "field": { "variant": 0 }, "op": "eq", "value": { "str": "OnConsoleMessage" } },
            { "field": { "tank": "vector_x" }, "op": "eq_eps", "value": { "f32": 1.0 }, "eps": 0.5 },
            { "field": { "table": { "row": { "key": "action" }, "col": { "absolute": 1 } } },
              "op": "neq", "value": { "str": "quit" } }
        ]
    }]);
    let interests = compile_interests(raw).unwrap();
    assert_eq!(interests.len(), 1);
    let i = &interests[0];
    assert_eq!(i.kind, InterestKind::Tank(TankType::CallFunction));
    assert_eq!(i.predicate.len(), 3);
    assert_eq!(i.predicate[1].eps, Some(0.5));
    assert_eq!(
        i.predicate[2].field,
        Field::Table {
            row: RowSelector::Key("action".into()),
            col: ColSelector::Absolute(1)
        }
    );

    let p = call_subject();
    assert!(i.predicate[0].eval(&Subject::new(&p)));
}

#[test]
fn shape_errors_are_reported_at_compile_time() {
    for bad in [
        serde_json::json!([{ "id": 1, "kind": { "net": "TRACK" },
            "predicate": [{ "field": { "tank": "net_id" }, "op": "gt", "value": { "str": "x" } }] }]),
        serde_json::json!([{ "id": 1, "kind": { "net": "TRACK" },
            "predicate": [{ "field": { "tank": "flags" }, "op": "bit_test", "value": { "f32": 1.0 } }] }]),
        serde_json::json!([{ "id": 1, "kind": { "net": "TRACK" },
            "predicate": [{ "field": { "tank": "float_var" }, "op": "eq_eps", "value": { "f32": 1.0 }, "eps": -1.0 }] }]),
        serde_json::json!([{ "id": 1, "kind": { "net": "NOPE" } }]),
    ] {
        let err = compile_interests(bad).unwrap_err();
        assert_eq!(err.code().as_str(), "BAD_REQUEST");
    }
}
