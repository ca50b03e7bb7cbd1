//! Predicate clauses: one field, one operator, one literal.
//!
//! Evaluation never fails. A field that does not exist on the packet, a
//! missing table cell or a literal of the wrong type makes the clause false.

use std::cell::OnceCell;
use std::cmp::Ordering;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use gtproxy_core::protocol::{NetPacket, Variant, VariantValue};

/// Tolerance for `eq_eps` when the clause does not set one.
pub const DEFAULT_EPSILON: f32 = 1e-4;

/// Fields of the fixed tank struct, plus its tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TankField {
    Type,
    ObjectType,
    JumpCount,
    AnimationType,
    NetId,
    TargetNetId,
    Flags,
    FloatVar,
    Value,
    VectorX,
    VectorY,
    VectorX2,
    VectorY2,
    ParticleRotation,
    IntX,
    IntY,
    ExtendedLen,
    ExtendedData,
}

/// How to pick a row of a text table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowSelector {
    /// Row whose first cell is the key (last such row wins).
    Key(String),
    /// First row holding the value in any cell; columns are then relative
    /// to that cell.
    KeyAny(String),
    /// Row by position.
    Index(usize),
}

/// How to pick a cell within the selected row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColSelector {
    Absolute(usize),
    /// Offset from the cell the row selector matched (column 0 for `key`/`index`).
    Relative(isize),
}

/// Closed set of addressable packet fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Tank(TankField),
    Table { row: RowSelector, col: ColSelector },
    /// N-th value of a CALL_FUNCTION tank packet's variant list.
    Variant(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    Eq,
    EqEps,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    /// Any bit of the mask is set.
    BitTest,
    Contains,
    StartsWith,
    EndsWith,
    /// `%` matches any run of bytes, `_` exactly one.
    Like,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Literal {
    U32(u32),
    I32(i32),
    F32(f32),
    Str(String),
    Bytes(Vec<u8>),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
}

impl Literal {
    fn number(&self) -> Option<f64> {
        match self {
            Literal::U32(v) => Some(f64::from(*v)),
            Literal::I32(v) => Some(f64::from(*v)),
            Literal::F32(v) => Some(f64::from(*v)),
            _ => None,
        }
    }

    fn bytes(&self) -> Option<&[u8]> {
        match self {
            Literal::Str(s) => Some(s.as_bytes()),
            Literal::Bytes(b) => Some(b),
            _ => None,
        }
    }

    fn mask(&self) -> Option<u32> {
        match self {
            Literal::U32(v) => Some(*v),
            Literal::I32(v) => Some(*v as u32),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Clause {
    pub field: Field,
    pub op: Op,
    pub value: Literal,
    /// Tolerance for `eq_eps`.
    #[serde(default)]
    pub eps: Option<f32>,
}

/// A packet under evaluation. Decodes the CALL_FUNCTION variant list at most
/// once, however many clauses look at it.
pub struct Subject<'a> {
    packet: &'a NetPacket,
    call: OnceCell<Option<Variant>>,
}

impl<'a> Subject<'a> {
    pub fn new(packet: &'a NetPacket) -> Self {
        Self {
            packet,
            call: OnceCell::new(),
        }
    }

    pub fn packet(&self) -> &NetPacket {
        self.packet
    }

    fn call(&self) -> Option<&Variant> {
        self.call
            .get_or_init(|| {
                self.packet
                    .as_tank()
                    .and_then(|t| t.call_function().ok().flatten())
            })
            .as_ref()
    }
}

/// A field value pulled out of a packet.
#[derive(Debug, Clone)]
enum Resolved {
    U32(u32),
    I32(i32),
    F32(f32),
    Bytes(Bytes),
    Vec2(f32, f32),
    Vec3(f32, f32, f32),
}

impl Resolved {
    /// Numeric view. Table cells are text, so they are parsed on demand.
    fn number(&self) -> Option<f64> {
        match self {
            Resolved::U32(v) => Some(f64::from(*v)),
            Resolved::I32(v) => Some(f64::from(*v)),
            Resolved::F32(v) => Some(f64::from(*v)),
            Resolved::Bytes(b) => std::str::from_utf8(b).ok()?.trim().parse().ok(),
            _ => None,
        }
    }

    fn bits(&self) -> Option<u32> {
        match self {
            Resolved::U32(v) => Some(*v),
            Resolved::I32(v) => Some(*v as u32),
            _ => None,
        }
    }
}

fn resolve(field: &Field, subject: &Subject<'_>) -> Option<Resolved> {
    match field {
        Field::Tank(f) => {
            let t = subject.packet.as_tank()?;
            Some(match f {
                TankField::Type => Resolved::U32(t.ty as u32),
                TankField::ObjectType => Resolved::U32(u32::from(t.object_type)),
                TankField::JumpCount => Resolved::U32(u32::from(t.jump_count)),
                TankField::AnimationType => Resolved::U32(u32::from(t.animation_type)),
                TankField::NetId => Resolved::U32(t.net_id),
                TankField::TargetNetId => Resolved::I32(t.target_net_id),
                TankField::Flags => Resolved::U32(t.flags.bits()),
                TankField::FloatVar => Resolved::F32(t.float_var),
                TankField::Value => Resolved::U32(t.value),
                TankField::VectorX => Resolved::F32(t.vector_x),
                TankField::VectorY => Resolved::F32(t.vector_y),
                TankField::VectorX2 => Resolved::F32(t.vector_x2),
                TankField::VectorY2 => Resolved::F32(t.vector_y2),
                TankField::ParticleRotation => Resolved::F32(t.particle_rotation),
                TankField::IntX => Resolved::I32(t.int_x),
                TankField::IntY => Resolved::I32(t.int_y),
                TankField::ExtendedLen => Resolved::U32(u32::try_from(t.extended.len()).ok()?),
                TankField::ExtendedData => Resolved::Bytes(t.extended.clone()),
            })
        }
        Field::Table { row, col } => {
            let table = subject.packet.as_table()?;
            let (r, base) = match row {
                RowSelector::Key(k) => (table.position(k.as_bytes())?, 0),
                RowSelector::KeyAny(k) => table.find(k.as_bytes())?,
                RowSelector::Index(i) => (*i, 0),
            };
            let c = match col {
                ColSelector::Absolute(c) => *c,
                ColSelector::Relative(off) => base.checked_add_signed(*off)?,
            };
            table.row(r)?.get(c).cloned().map(Resolved::Bytes)
        }
        Field::Variant(n) => Some(match subject.call()?.get(*n)? {
            VariantValue::Float(v) => Resolved::F32(*v),
            VariantValue::Bytes(b) => Resolved::Bytes(b.clone()),
            VariantValue::Vec2(x, y) => Resolved::Vec2(*x, *y),
            VariantValue::Vec3(x, y, z) => Resolved::Vec3(*x, *y, *z),
            VariantValue::Uint(v) => Resolved::U32(*v),
            VariantValue::Int(v) => Resolved::I32(*v),
        }),
    }
}

fn close(a: f32, b: f32, eps: f32) -> bool {
    if eps == 0.0 {
        a == b
    } else {
        (a - b).abs() <= eps
    }
}

/// `None` when the two sides cannot be compared.
fn equals(value: &Resolved, lit: &Literal, eps: f32) -> Option<bool> {
    match (value, lit) {
        (Resolved::Vec2(x, y), Literal::Vec2([lx, ly])) => {
            Some(close(*x, *lx, eps) && close(*y, *ly, eps))
        }
        (Resolved::Vec3(x, y, z), Literal::Vec3([lx, ly, lz])) => {
            Some(close(*x, *lx, eps) && close(*y, *ly, eps) && close(*z, *lz, eps))
        }
        (Resolved::Bytes(b), Literal::Str(_) | Literal::Bytes(_)) => {
            Some(lit.bytes() == Some(b.as_ref()))
        }
        _ => {
            let (a, b) = (value.number()?, lit.number()?);
            Some(if eps == 0.0 {
                a == b
            } else {
                (a - b).abs() <= f64::from(eps)
            })
        }
    }
}

fn order(value: &Resolved, lit: &Literal) -> Option<Ordering> {
    value.number()?.partial_cmp(&lit.number()?)
}

fn like(text: &[u8], pattern: &[u8]) -> bool {
    let (mut t, mut p) = (0, 0);
    // Last `%` seen, and the text position it is currently absorbing up to.
    let mut star: Option<(usize, usize)> = None;
    while let Some(&ch) = text.get(t) {
        match pattern.get(p) {
            Some(b'%') => {
                star = Some((p, t));
                p += 1;
            }
            Some(&pc) if pc == b'_' || pc == ch => {
                p += 1;
                t += 1;
            }
            _ => match star {
                Some((sp, st)) => {
                    star = Some((sp, st + 1));
                    p = sp + 1;
                    t = st + 1;
                }
                None => return false,
            },
        }
    }
    pattern.get(p..).unwrap_or(&[]).iter().all(|c| *c == b'%')
}

impl Clause {
    pub fn new(field: Field, op: Op, value: Literal) -> Self {
        Self {
            field,
            op,
            value,
            eps: None,
        }
    }

    pub fn with_eps(mut self, eps: f32) -> Self {
        self.eps = Some(eps);
        self
    }

    pub fn eval(&self, subject: &Subject<'_>) -> bool {
        let Some(value) = resolve(&self.field, subject) else {
            return false;
        };
        let lit = &self.value;
        match self.op {
            Op::Eq => equals(&value, lit, 0.0) == Some(true),
            Op::Neq => equals(&value, lit, 0.0) == Some(false),
            Op::EqEps => equals(&value, lit, self.eps.unwrap_or(DEFAULT_EPSILON)) == Some(true),
            Op::Gt => order(&value, lit) == Some(Ordering::Greater),
            Op::Gte => matches!(order(&value, lit), Some(Ordering::Greater | Ordering::Equal)),
            Op::Lt => order(&value, lit) == Some(Ordering::Less),
            Op::Lte => matches!(order(&value, lit), Some(Ordering::Less | Ordering::Equal)),
            Op::BitTest => match (value.bits(), lit.mask()) {
                (Some(v), Some(m)) => v & m != 0,
                _ => false,
            },
            Op::Contains | Op::StartsWith | Op::EndsWith | Op::Like => {
                let (Resolved::Bytes(text), Some(needle)) = (&value, lit.bytes()) else {
                    return false;
                };
                match self.op {
                    Op::Contains => {
                        needle.is_empty() || text.windows(needle.len()).any(|w| w == needle)
                    }
                    Op::StartsWith => text.starts_with(needle),
                    Op::EndsWith => text.ends_with(needle),
                    _ => like(text, needle),
                }
            }
        }
    }

    /// Shape check run once at registration.
    pub fn validate(&self) -> Result<(), &'static str> {
        let lit = &self.value;
        match self.op {
            Op::Contains | Op::StartsWith | Op::EndsWith | Op::Like if lit.bytes().is_none() => {
                Err("string operators need a `str` or `bytes` literal")
            }
            Op::Gt | Op::Gte | Op::Lt | Op::Lte if lit.number().is_none() => {
                Err("ordering operators need a numeric literal")
            }
            Op::BitTest if lit.mask().is_none() => Err("`bit_test` needs an integer mask"),
            Op::EqEps if lit.bytes().is_some() => Err("`eq_eps` needs a numeric or vector literal"),
            _ => match self.eps {
                Some(e) if !e.is_finite() || e < 0.0 => Err("`eps` must be a finite non-negative number"),
                _ => Ok(()),
            },
        }
    }
}
