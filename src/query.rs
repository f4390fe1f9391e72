//! 查询谓词树
//!
//! ```text
//! Query ::= Equal(attr, value)
//!         | And([Query])
//!         | In(attr, {value})
//!         | ExistsIn(foreign, local_attr, foreign_attr, filter?)
//! ```
//!
//! 节点不可变；`ExistsIn` 持有外部集合的共享句柄，只读不写。

use crate::attribute::Attribute;
use crate::collection::IndexedCollection;
use crate::field_type::Value;

#[derive(Clone)]
pub enum Query {
    Equal {
        attribute: Attribute,
        value:     Value,
    },
    And(Vec<Query>),
    In {
        attribute: Attribute,
        values:    Vec<Value>,
    },
    ExistsIn {
        foreign:           IndexedCollection,
        local_attribute:   Attribute,
        foreign_attribute: Attribute,
        filter:            Option<Box<Query>>,
    },
}

pub fn equal(attribute: &Attribute, value: impl Into<Value>) -> Query {
    Query::Equal { attribute: attribute.clone(), value: value.into() }
}

pub fn and(children: impl IntoIterator<Item = Query>) -> Query {
    Query::And(children.into_iter().collect())
}

pub fn r#in<V: Into<Value>>(attribute: &Attribute, values: impl IntoIterator<Item = V>) -> Query {
    Query::In {
        attribute: attribute.clone(),
        values:    values.into_iter().map(Into::into).collect(),
    }
}

/// 本地记录存在 `foreign_attribute == local_attribute` 的外部记录时匹配
pub fn exists_in(
    foreign:           &IndexedCollection,
    local_attribute:   &Attribute,
    foreign_attribute: &Attribute,
) -> Query {
    Query::ExistsIn {
        foreign:           foreign.clone(),
        local_attribute:   local_attribute.clone(),
        foreign_attribute: foreign_attribute.clone(),
        filter:            None,
    }
}

/// 同 [`exists_in`]，外部记录还需满足 `filter`
pub fn exists_in_where(
    foreign:           &IndexedCollection,
    local_attribute:   &Attribute,
    foreign_attribute: &Attribute,
    filter:            Query,
) -> Query {
    Query::ExistsIn {
        foreign:           foreign.clone(),
        local_attribute:   local_attribute.clone(),
        foreign_attribute: foreign_attribute.clone(),
        filter:            Some(Box::new(filter)),
    }
}

impl std::fmt::Debug for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

impl std::fmt::Display for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Equal { attribute, value } => write!(f, "{} = {}", attribute.name(), value),
            Self::And(children) => {
                write!(f, "(")?;
                for (i, c) in children.iter().enumerate() {
                    if i > 0 { write!(f, " AND ")?; }
                    write!(f, "{c}")?;
                }
                write!(f, ")")
            }
            Self::In { attribute, values } => {
                write!(f, "{} IN [", attribute.name())?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 { write!(f, ", ")?; }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            Self::ExistsIn { foreign, local_attribute, foreign_attribute, filter } => {
                write!(
                    f, "EXISTS {}({} = {}",
                    foreign.entity(), foreign_attribute.name(), local_attribute.name(),
                )?;
                if let Some(q) = filter {
                    write!(f, " WHERE {q}")?;
                }
                write!(f, ")")
            }
        }
    }
}
