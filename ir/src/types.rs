//! Value and buffer types.
//!
//! The type system is deliberately small: three scalar types and a shaped
//! buffer type carrying a memory-space tag. Buffer shapes may contain
//! dynamic dimensions, written `?` in the display form.

use std::fmt;

use smallvec::SmallVec;

// ============================================================================
// MEMORY SPACE
// ============================================================================

/// Memory tier tag carried on buffer types.
///
/// The numbering follows the hardware: L3 (host/bulk) is tag 0, L2
/// (intermediate) is tag 1, L1 (fastest, adjacent to compute) is tag 2.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum MemorySpace {
    /// Host memory, tag 0.
    #[default]
    L3,
    /// Intermediate scratch tier, tag 1.
    L2,
    /// Tile-local fast tier, tag 2.
    L1,
}

impl MemorySpace {
    /// Numeric tag as written on buffer types.
    pub fn tag(self) -> u32 {
        match self {
            Self::L3 => 0,
            Self::L2 => 1,
            Self::L1 => 2,
        }
    }

    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(Self::L3),
            1 => Some(Self::L2),
            2 => Some(Self::L1),
            _ => None,
        }
    }
}

impl fmt::Display for MemorySpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::L3 => write!(f, "L3"),
            Self::L2 => write!(f, "L2"),
            Self::L1 => write!(f, "L1"),
        }
    }
}

// ============================================================================
// SHAPES
// ============================================================================

/// One buffer dimension: a static extent or a dynamic placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dim {
    Static(i64),
    Dynamic,
}

impl Dim {
    pub fn as_static(self) -> Option<i64> {
        match self {
            Self::Static(d) => Some(d),
            Self::Dynamic => None,
        }
    }

    pub fn is_dynamic(self) -> bool {
        matches!(self, Self::Dynamic)
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(d) => write!(f, "{d}"),
            Self::Dynamic => write!(f, "?"),
        }
    }
}

/// Element type of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElemType {
    I8,
    I32,
    I64,
    F32,
}

impl ElemType {
    /// Storage size of one element in bytes.
    pub fn size_bytes(self) -> i64 {
        match self {
            Self::I8 => 1,
            Self::I32 | Self::F32 => 4,
            Self::I64 => 8,
        }
    }
}

impl fmt::Display for ElemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::I8 => write!(f, "i8"),
            Self::I32 => write!(f, "i32"),
            Self::I64 => write!(f, "i64"),
            Self::F32 => write!(f, "f32"),
        }
    }
}

// ============================================================================
// MEMREF
// ============================================================================

/// A shaped buffer type: dimensions, element type, memory space.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemRefType {
    pub shape: SmallVec<[Dim; 4]>,
    pub elem: ElemType,
    pub space: MemorySpace,
}

impl MemRefType {
    /// Fully static buffer type.
    pub fn new(shape: impl IntoIterator<Item = i64>, elem: ElemType, space: MemorySpace) -> Self {
        Self { shape: shape.into_iter().map(Dim::Static).collect(), elem, space }
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// The shape as static extents, or `None` if any dimension is dynamic.
    pub fn static_shape(&self) -> Option<SmallVec<[i64; 4]>> {
        self.shape.iter().map(|d| d.as_static()).collect()
    }

    pub fn has_static_shape(&self) -> bool {
        self.shape.iter().all(|d| !d.is_dynamic())
    }

    /// Total storage in bytes, or `None` if the shape is dynamic.
    pub fn byte_size(&self) -> Option<i64> {
        let elems = self.static_shape()?.iter().product::<i64>();
        Some(elems * self.elem.size_bytes())
    }
}

impl fmt::Display for MemRefType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "memref<")?;
        for d in &self.shape {
            write!(f, "{d}x")?;
        }
        write!(f, "{}", self.elem)?;
        if self.space != MemorySpace::L3 {
            write!(f, ", {}", self.space.tag())?;
        }
        write!(f, ">")
    }
}

// ============================================================================
// TYPE
// ============================================================================

/// A value type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Index,
    I32,
    I64,
    MemRef(MemRefType),
}

impl Type {
    /// Fully static buffer type.
    pub fn memref(shape: impl IntoIterator<Item = i64>, elem: ElemType, space: MemorySpace) -> Self {
        Self::MemRef(MemRefType::new(shape, elem, space))
    }

    pub fn as_memref(&self) -> Option<&MemRefType> {
        match self {
            Self::MemRef(m) => Some(m),
            _ => None,
        }
    }

    /// Memory space of a buffer type, `None` for scalars.
    pub fn space(&self) -> Option<MemorySpace> {
        self.as_memref().map(|m| m.space)
    }

    pub fn is_index(&self) -> bool {
        matches!(self, Self::Index)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index => write!(f, "index"),
            Self::I32 => write!(f, "i32"),
            Self::I64 => write!(f, "i64"),
            Self::MemRef(m) => write!(f, "{m}"),
        }
    }
}
