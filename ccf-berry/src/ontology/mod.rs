//! 脑区结构层级 (ontology) 与脑区统计.
//!
//! 结构层级是一片森林: 每个结构至多一个父结构, 选中一个结构即隐含选中它的全部后代.
//! 森林在载入后不再变化, 因此每个结构的后代集合只在第一次查询时计算.

mod quantify;

pub use quantify::{
    quantify, quantify_volume, LabelHistogram, Quantification, QuantifyError, QuantifyResult,
    StructureStat,
};

use either::Either;
use once_cell::sync::OnceCell;
use std::collections::{HashMap, HashSet};
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 一个脑区结构.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StructureNode {
    /// 结构 id, 与图谱结构 id 网格中的取值对应.
    pub id: u32,

    /// 全名.
    pub name: String,

    /// 缩写.
    pub acronym: String,

    /// 父结构, 根结构为 `None`.
    pub parent: Option<u32>,
}

impl StructureNode {
    /// 新建.
    pub fn new(id: u32, name: &str, acronym: &str, parent: Option<u32>) -> Self {
        Self {
            id,
            name: name.to_owned(),
            acronym: acronym.to_owned(),
            parent,
        }
    }
}

/// 构建结构森林错误.
#[derive(Debug, Clone, PartialEq)]
pub enum OntologyError {
    /// 结构 id 重复.
    DuplicateId(u32),

    /// 父结构不存在.
    UnknownParent {
        /// 结构 id.
        id: u32,
        /// 不存在的父结构 id.
        parent: u32,
    },

    /// 父指针成环, 附带环上的一个结构 id.
    Cycle(u32),

    /// `structure_id_path` 为空, 或其末尾不是结构自身.
    InvalidPath(u32),

    /// 读取文件错误.
    Io(String),

    /// JSON 格式错误.
    Json(String),
}

impl fmt::Display for OntologyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateId(id) => write!(f, "duplicate structure id {id}"),
            Self::UnknownParent { id, parent } => {
                write!(f, "structure {id} has unknown parent {parent}")
            }
            Self::Cycle(id) => write!(f, "parent references of structure {id} form a cycle"),
            Self::InvalidPath(id) => write!(f, "invalid structure_id_path of structure {id}"),
            Self::Io(e) => write!(f, "failed to read ontology: {e}"),
            Self::Json(e) => write!(f, "malformed ontology: {e}"),
        }
    }
}

impl std::error::Error for OntologyError {}

/// 结构层级相关操作的结果.
pub type OntologyResult<T> = Result<T, OntologyError>;

/// 以 id 索引的结构森林.
///
/// 构建时校验: id 不重复, 父结构都存在, 父指针无环.
#[derive(Debug)]
pub struct StructureForest {
    nodes: HashMap<u32, StructureNode>,
    children: HashMap<u32, Vec<u32>>,
    roots: Vec<u32>,
    acronyms: HashMap<String, u32>,
    closure: HashMap<u32, OnceCell<HashSet<u32>>>,
}

impl StructureForest {
    /// 构建并校验.
    pub fn new<I: IntoIterator<Item = StructureNode>>(nodes: I) -> OntologyResult<Self> {
        let mut map = HashMap::new();
        for node in nodes {
            let id = node.id;
            if map.insert(id, node).is_some() {
                return Err(OntologyError::DuplicateId(id));
            }
        }

        let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
        let mut roots = vec![];
        for node in map.values() {
            match node.parent {
                Some(p) if !map.contains_key(&p) => {
                    return Err(OntologyError::UnknownParent {
                        id: node.id,
                        parent: p,
                    })
                }
                Some(p) => children.entry(p).or_default().push(node.id),
                None => roots.push(node.id),
            }
        }

        // 父指针链长超过结构个数即说明成环.
        for &start in map.keys() {
            let mut cur = start;
            let mut steps = 0;
            while let Some(p) = map[&cur].parent {
                steps += 1;
                if steps > map.len() {
                    return Err(OntologyError::Cycle(start));
                }
                cur = p;
            }
        }

        children.values_mut().for_each(|v| v.sort_unstable());
        roots.sort_unstable();
        let acronyms = map.values().map(|n| (n.acronym.clone(), n.id)).collect();
        let closure = map.keys().map(|&id| (id, OnceCell::new())).collect();
        log::debug!("Built structure forest: {} nodes, {} roots", map.len(), roots.len());
        Ok(Self {
            nodes: map,
            children,
            roots,
            acronyms,
            closure,
        })
    }

    /// 结构个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// 是否为空.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// 按 id 查找.
    #[inline]
    pub fn get(&self, id: u32) -> Option<&StructureNode> {
        self.nodes.get(&id)
    }

    /// 按缩写查找.
    #[inline]
    pub fn by_acronym(&self, acronym: &str) -> Option<&StructureNode> {
        self.acronyms.get(acronym).and_then(|id| self.nodes.get(id))
    }

    /// 根结构, 按 id 递增.
    #[inline]
    pub fn roots(&self) -> &[u32] {
        &self.roots
    }

    /// 直接子结构, 按 id 递增.
    pub fn children(&self, id: u32) -> impl Iterator<Item = &StructureNode> + '_ {
        match self.children.get(&id) {
            Some(v) => Either::Left(v.iter().filter_map(|c| self.nodes.get(c))),
            None => Either::Right(std::iter::empty()),
        }
    }

    /// 从 `id` 到根的路径, 含 `id` 自身. 未知 id 返回空.
    pub fn ancestors(&self, id: u32) -> Vec<u32> {
        let mut path = vec![];
        let mut cur = self.nodes.get(&id);
        while let Some(node) = cur {
            path.push(node.id);
            cur = node.parent.and_then(|p| self.nodes.get(&p));
        }
        path
    }

    /// `id` 及其全部后代. 首次查询时计算, 之后直接返回. 未知 id 返回 `None`.
    pub fn descendants(&self, id: u32) -> Option<&HashSet<u32>> {
        let cell = self.closure.get(&id)?;
        Some(cell.get_or_init(|| {
            let mut set = HashSet::new();
            let mut stack = vec![id];
            while let Some(cur) = stack.pop() {
                if set.insert(cur) {
                    if let Some(c) = self.children.get(&cur) {
                        stack.extend_from_slice(c);
                    }
                }
            }
            set
        }))
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "serde")] {
        use std::path::Path;

        /// Allen 结构列表中的一项. 只取用到的字段.
        #[derive(Deserialize)]
        struct AllenStructure {
            id: u32,
            name: String,
            acronym: String,
            structure_id_path: Vec<u32>,
        }

        impl TryFrom<AllenStructure> for StructureNode {
            type Error = OntologyError;

            fn try_from(s: AllenStructure) -> Result<Self, Self::Error> {
                let path = &s.structure_id_path;
                if path.last() != Some(&s.id) {
                    return Err(OntologyError::InvalidPath(s.id));
                }
                let parent = path.len().checked_sub(2).map(|i| path[i]);
                Ok(StructureNode {
                    id: s.id,
                    name: s.name,
                    acronym: s.acronym,
                    parent,
                })
            }
        }

        /// 读取 Allen 结构列表.
        impl StructureForest {
            /// 从 JSON 数组构建. 父结构取 `structure_id_path` 的倒数第二项.
            pub fn from_allen_json(s: &str) -> OntologyResult<Self> {
                let raw: Vec<AllenStructure> =
                    serde_json::from_str(s).map_err(|e| OntologyError::Json(e.to_string()))?;
                let nodes = raw
                    .into_iter()
                    .map(StructureNode::try_from)
                    .collect::<OntologyResult<Vec<_>>>()?;
                Self::new(nodes)
            }

            /// 从文件读取.
            pub fn load<P: AsRef<Path>>(path: P) -> OntologyResult<Self> {
                let s = std::fs::read_to_string(path.as_ref())
                    .map_err(|e| OntologyError::Io(e.to_string()))?;
                let forest = Self::from_allen_json(&s)?;
                log::info!(
                    "Loaded {} structures from `{}`",
                    forest.len(),
                    path.as_ref().display()
                );
                Ok(forest)
            }
        }
    }
}

/// 三层的小森林:
///
/// ```text
/// 1 ─┬─ 2 ─┬─ 4
///    │     └─ 5
///    └─ 3 ─── 6
/// 7 ─── 8
/// ```
#[cfg(test)]
pub(crate) fn small_forest() -> StructureForest {
    StructureForest::new([
        StructureNode::new(1, "root", "R", None),
        StructureNode::new(2, "left", "L", Some(1)),
        StructureNode::new(3, "right", "Rt", Some(1)),
        StructureNode::new(4, "left a", "La", Some(2)),
        StructureNode::new(5, "left b", "Lb", Some(2)),
        StructureNode::new(6, "right a", "Ra", Some(3)),
        StructureNode::new(7, "other", "O", None),
        StructureNode::new(8, "other a", "Oa", Some(7)),
    ])
    .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[u32]) -> HashSet<u32> {
        ids.iter().copied().collect()
    }

    #[test]
    fn test_descendants() {
        let f = small_forest();
        assert_eq!(f.descendants(1), Some(&set(&[1, 2, 3, 4, 5, 6])));
        assert_eq!(f.descendants(2), Some(&set(&[2, 4, 5])));
        assert_eq!(f.descendants(6), Some(&set(&[6])));
        assert_eq!(f.descendants(99), None);
        // 第二次查询返回同一份集合.
        assert!(std::ptr::eq(f.descendants(1).unwrap(), f.descendants(1).unwrap()));
    }

    #[test]
    fn test_navigation() {
        let f = small_forest();
        assert_eq!(f.roots(), &[1, 7]);
        let c: Vec<u32> = f.children(2).map(|n| n.id).collect();
        assert_eq!(c, vec![4, 5]);
        assert_eq!(f.children(4).count(), 0);
        assert_eq!(f.ancestors(5), vec![5, 2, 1]);
        assert_eq!(f.by_acronym("Ra").map(|n| n.id), Some(6));
        assert!(f.by_acronym("nope").is_none());
    }

    #[test]
    fn test_invalid_forests() {
        assert_eq!(
            StructureForest::new([
                StructureNode::new(1, "a", "a", None),
                StructureNode::new(1, "b", "b", None),
            ])
            .unwrap_err(),
            OntologyError::DuplicateId(1)
        );
        assert_eq!(
            StructureForest::new([StructureNode::new(1, "a", "a", Some(9))]).unwrap_err(),
            OntologyError::UnknownParent { id: 1, parent: 9 }
        );
        assert!(matches!(
            StructureForest::new([
                StructureNode::new(1, "a", "a", Some(2)),
                StructureNode::new(2, "b", "b", Some(1)),
                StructureNode::new(3, "c", "c", None),
            ]),
            Err(OntologyError::Cycle(1 | 2))
        ));
        assert_eq!(
            StructureForest::new([StructureNode::new(4, "a", "a", Some(4))]).unwrap_err(),
            OntologyError::Cycle(4)
        );
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_allen_json() {
        let json = r#"[
            {"id": 997, "name": "root", "acronym": "root", "structure_id_path": [997],
             "rgb_triplet": [255, 255, 255]},
            {"id": 8, "name": "Basic cell groups and regions", "acronym": "grey",
             "structure_id_path": [997, 8]},
            {"id": 567, "name": "Cerebrum", "acronym": "CH", "structure_id_path": [997, 8, 567]}
        ]"#;
        let f = StructureForest::from_allen_json(json).unwrap();
        assert_eq!(f.get(567).unwrap().parent, Some(8));
        assert_eq!(f.roots(), &[997]);
        assert_eq!(f.descendants(8), Some(&set(&[8, 567])));

        let bad = r#"[{"id": 1, "name": "a", "acronym": "a", "structure_id_path": [2]}]"#;
        assert_eq!(
            StructureForest::from_allen_json(bad).unwrap_err(),
            OntologyError::InvalidPath(1)
        );
        assert!(matches!(
            StructureForest::from_allen_json("{"),
            Err(OntologyError::Json(_))
        ));

        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("structures.json");
        std::fs::write(&p, json).unwrap();
        assert_eq!(StructureForest::load(&p).unwrap().len(), 3);
    }
}
