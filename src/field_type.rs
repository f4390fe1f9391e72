//! 字段类型与运行时值

use std::sync::Arc;

/// 记录字段 / 属性值的逻辑类型
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    Bool,
    Int32,
    Int64,
    Text,
    /// 变长字节
    Bytes,
    /// 复合属性：按顺序拼接各成员属性的值
    Tuple(Vec<FieldType>),
}

impl FieldType {
    /// `value` 是否可以存放在该类型的字段中（`Null` 由 nullable 标志单独判断）
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (Self::Bool,  Value::Bool(_))
            | (Self::Int32, Value::Int32(_))
            | (Self::Int64, Value::Int64(_))
            | (Self::Text,  Value::Text(_))
            | (Self::Bytes, Value::Bytes(_)) => true,
            (Self::Tuple(types), Value::Tuple(values)) =>
                types.len() == values.len()
                    && types.iter().zip(values).all(|(t, v)| v.is_null() || t.accepts(v)),
            _ => false,
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool   => write!(f, "BOOL"),
            Self::Int32  => write!(f, "INT"),
            Self::Int64  => write!(f, "BIGINT"),
            Self::Text   => write!(f, "TEXT"),
            Self::Bytes  => write!(f, "BYTES"),
            Self::Tuple(types) => {
                write!(f, "(")?;
                for (i, t) in types.iter().enumerate() {
                    if i > 0 { write!(f, ", ")?; }
                    write!(f, "{t}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// 值（运行时表示）
///
/// 作为索引键使用，因此必须 `Eq + Hash`；不提供浮点类型。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Value {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Text(Arc<str>),
    Bytes(Arc<[u8]>),
    Tuple(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool { matches!(self, Self::Null) }

    /// 没有可比较的值：`Null`，或各成员都缺失的复合值。
    /// 缺失的值不进入索引，也不与任何值相等（包括另一个缺失值）
    pub fn is_absent(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Tuple(values) => values.iter().all(Value::is_absent),
            _ => false,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int32(v) => Some(*v as i64),
            Self::Int64(v) => Some(*v),
            _ => None,
        }
    }
    pub fn as_str(&self) -> Option<&str> {
        match self { Self::Text(s) => Some(s), _ => None }
    }
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self { Self::Bytes(b) => Some(b), _ => None }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null     => write!(f, "NULL"),
            Self::Bool(v)  => write!(f, "{v}"),
            Self::Int32(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Text(s)  => write!(f, "{s:?}"),
            Self::Bytes(b) => write!(f, "{}", String::from_utf8_lossy(b)),
            Self::Tuple(values) => {
                write!(f, "(")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 { write!(f, ", ")?; }
                    write!(f, "{v}")?;
                }
                write!(f, ")")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self { Self::Bool(v) }
}
impl From<i32> for Value {
    fn from(v: i32) -> Self { Self::Int32(v) }
}
impl From<i64> for Value {
    fn from(v: i64) -> Self { Self::Int64(v) }
}
impl From<&str> for Value {
    fn from(v: &str) -> Self { Self::Text(Arc::from(v)) }
}
impl From<String> for Value {
    fn from(v: String) -> Self { Self::Text(Arc::from(v)) }
}
impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self { Self::Bytes(Arc::from(v)) }
}
impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self { v.map_or(Self::Null, Into::into) }
}
