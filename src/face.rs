use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A codimension-1 face of a `D`-dimensional patch. Sides are enumerated in
/// axis-major order with the lower side first: west(0), east(1), south(2),
/// north(3) in 2D, plus bottom(4), top(5) in 3D. This ordering is part of
/// the serialized interface and must not change.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct Side<const D: usize>(u8);

impl<const D: usize> Side<D> {
    /// The number of sides of a `D`-dimensional patch.
    pub const COUNT: usize = 2 * D;

    pub fn from_index(index: usize) -> Result<Self> {
        if index < Self::COUNT {
            Ok(Self(index as u8))
        } else {
            Err(Error::FaceOutOfRange { kind: "side", index })
        }
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// The axis this side is normal to.
    pub fn axis(self) -> usize {
        self.0 as usize / 2
    }

    /// Whether this is the upper side on its axis.
    pub fn upper_side(self) -> bool {
        self.0 % 2 == 1
    }

    /// The side facing this one on a neighboring patch.
    pub fn opposite(self) -> Self {
        Self(self.0 ^ 1)
    }

    /// Yields each side exactly once, in index order.
    pub fn all() -> impl Iterator<Item = Self> {
        (0..Self::COUNT).map(|i| Self(i as u8))
    }

    pub(crate) fn new(axis: usize, upper: bool) -> Self {
        Self((2 * axis + upper as usize) as u8)
    }
}

impl Side<2> {
    pub fn west() -> Self {
        Self(0)
    }
    pub fn east() -> Self {
        Self(1)
    }
    pub fn south() -> Self {
        Self(2)
    }
    pub fn north() -> Self {
        Self(3)
    }
}

impl Side<3> {
    pub fn west() -> Self {
        Self(0)
    }
    pub fn east() -> Self {
        Self(1)
    }
    pub fn south() -> Self {
        Self(2)
    }
    pub fn north() -> Self {
        Self(3)
    }
    pub fn bottom() -> Self {
        Self(4)
    }
    pub fn top() -> Self {
        Self(5)
    }
}

const SIDE_NAMES: [&str; 6] = ["WEST", "EAST", "SOUTH", "NORTH", "BOTTOM", "TOP"];

impl<const D: usize> std::fmt::Display for Side<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", SIDE_NAMES[self.0 as usize])
    }
}

/// A 0-dimensional face of a `D`-dimensional patch. The index is a bit set
/// with bit `a` meaning "upper on axis `a`": sw(0), se(1), nw(2), ne(3) in
/// 2D; bsw through tne (0..8) in 3D.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct Corner<const D: usize>(u8);

impl<const D: usize> Corner<D> {
    pub const COUNT: usize = 1 << D;

    pub fn from_index(index: usize) -> Result<Self> {
        if index < Self::COUNT {
            Ok(Self(index as u8))
        } else {
            Err(Error::FaceOutOfRange { kind: "corner", index })
        }
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// The diagonally opposing corner.
    pub fn opposite(self) -> Self {
        Self(self.0 ^ (Self::COUNT as u8 - 1))
    }

    /// Whether this corner is on the upper side of the given axis.
    pub fn on_upper(self, axis: usize) -> bool {
        self.0 >> axis & 1 == 1
    }

    /// The sides of the patch that meet at this corner, in side-index order.
    pub fn sides(self) -> [Side<D>; D] {
        let mut sides = [Side::<D>(0); D];
        for (axis, side) in sides.iter_mut().enumerate() {
            *side = Side::new(axis, self.on_upper(axis));
        }
        sides
    }

    pub fn all() -> impl Iterator<Item = Self> {
        (0..Self::COUNT).map(|i| Self(i as u8))
    }
}

impl Corner<2> {
    pub fn sw() -> Self {
        Self(0)
    }
    pub fn se() -> Self {
        Self(1)
    }
    pub fn nw() -> Self {
        Self(2)
    }
    pub fn ne() -> Self {
        Self(3)
    }
}

impl Corner<3> {
    pub fn bsw() -> Self {
        Self(0)
    }
    pub fn bse() -> Self {
        Self(1)
    }
    pub fn bnw() -> Self {
        Self(2)
    }
    pub fn bne() -> Self {
        Self(3)
    }
    pub fn tsw() -> Self {
        Self(4)
    }
    pub fn tse() -> Self {
        Self(5)
    }
    pub fn tnw() -> Self {
        Self(6)
    }
    pub fn tne() -> Self {
        Self(7)
    }
}

/// A codimension-2 face of a 3D patch. Each edge is tangent to one axis and
/// pinned to a lower/upper half on the other two. The enumeration interleaves
/// opposing pairs so that `opposite` is a single bit flip:
/// bs, tn, bn, ts, bw, te, be, tw, sw, ne, se, nw (0..12).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct Edge(u8);

/// (tangent axis, bit on first fixed axis, bit on second fixed axis) for
/// each edge, in enumeration order. Fixed axes are in increasing order: the
/// x-tangent group pins (y, z), the y-tangent group pins (x, z), and the
/// z-tangent group pins (x, y).
const EDGE_TABLE: [(usize, bool, bool); 12] = [
    (0, false, false), // bs
    (0, true, true),   // tn
    (0, true, false),  // bn
    (0, false, true),  // ts
    (1, false, false), // bw
    (1, true, true),   // te
    (1, true, false),  // be
    (1, false, true),  // tw
    (2, false, false), // sw
    (2, true, true),   // ne
    (2, true, false),  // se
    (2, false, true),  // nw
];

const EDGE_NAMES: [&str; 12] = [
    "BS", "TN", "BN", "TS", "BW", "TE", "BE", "TW", "SW", "NE", "SE", "NW",
];

impl Edge {
    pub const COUNT: usize = 12;

    pub fn from_index(index: usize) -> Result<Self> {
        if index < Self::COUNT {
            Ok(Self(index as u8))
        } else {
            Err(Error::FaceOutOfRange { kind: "edge", index })
        }
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// The axis this edge runs along.
    pub fn axis(self) -> usize {
        EDGE_TABLE[self.0 as usize].0
    }

    /// The two axes this edge is pinned on, in increasing order, with the
    /// upper-half flag for each.
    pub fn fixed_axes(self) -> [(usize, bool); 2] {
        let (tangent, b1, b2) = EDGE_TABLE[self.0 as usize];
        let mut fixed = [0, 1, 2].into_iter().filter(|&a| a != tangent);
        let a1 = fixed.next().unwrap();
        let a2 = fixed.next().unwrap();
        [(a1, b1), (a2, b2)]
    }

    /// The edge diagonally across on a neighboring patch.
    pub fn opposite(self) -> Self {
        Self(self.0 ^ 1)
    }

    /// The two sides of the patch that meet at this edge, in side-index
    /// order.
    pub fn sides(self) -> [Side<3>; 2] {
        let [(a1, b1), (a2, b2)] = self.fixed_axes();
        [Side::new(a1, b1), Side::new(a2, b2)]
    }

    pub fn all() -> impl Iterator<Item = Self> {
        (0..Self::COUNT).map(|i| Self(i as u8))
    }

    pub fn bs() -> Self {
        Self(0)
    }
    pub fn tn() -> Self {
        Self(1)
    }
    pub fn bn() -> Self {
        Self(2)
    }
    pub fn ts() -> Self {
        Self(3)
    }
    pub fn bw() -> Self {
        Self(4)
    }
    pub fn te() -> Self {
        Self(5)
    }
    pub fn be() -> Self {
        Self(6)
    }
    pub fn tw() -> Self {
        Self(7)
    }
    pub fn sw() -> Self {
        Self(8)
    }
    pub fn ne() -> Self {
        Self(9)
    }
    pub fn se() -> Self {
        Self(10)
    }
    pub fn nw() -> Self {
        Self(11)
    }
}

impl std::fmt::Display for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", EDGE_NAMES[self.0 as usize])
    }
}

/// An element of the 2^D subdivision of a D-dimensional region. Bit `a` of
/// the index means "upper half on axis `a`". Used to locate a refined patch
/// on its parent, and a fine face fragment on the coarse face it overlies.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct Orthant<const D: usize>(u8);

impl<const D: usize> Orthant<D> {
    pub const COUNT: usize = 1 << D;

    pub fn from_index(index: usize) -> Result<Self> {
        if index < Self::COUNT {
            Ok(Self(index as u8))
        } else {
            Err(Error::FaceOutOfRange { kind: "orthant", index })
        }
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn on_upper(self, axis: usize) -> bool {
        self.0 >> axis & 1 == 1
    }

    pub fn all() -> impl Iterator<Item = Self> {
        (0..Self::COUNT).map(|i| Self(i as u8))
    }
}

impl Orthant<1> {
    pub fn lower() -> Self {
        Self(0)
    }
    pub fn upper() -> Self {
        Self(1)
    }
}

const ORTHANT_NAMES_1: [&str; 2] = ["LOWER", "UPPER"];
const ORTHANT_NAMES_2: [&str; 4] = ["SW", "SE", "NW", "NE"];
const ORTHANT_NAMES_3: [&str; 8] = ["BSW", "BSE", "BNW", "BNE", "TSW", "TSE", "TNW", "TNE"];

/// Name of an orthant of a `dim`-dimensional region, as used in the textual
/// mesh format.
pub fn orthant_name(dim: usize, index: usize) -> &'static str {
    match dim {
        1 => ORTHANT_NAMES_1[index],
        2 => ORTHANT_NAMES_2[index],
        3 => ORTHANT_NAMES_3[index],
        _ => panic!("no orthant names for dimension {}", dim),
    }
}

/// Inverse of `orthant_name`.
pub fn orthant_from_name(dim: usize, name: &str) -> Option<usize> {
    let names: &[&str] = match dim {
        1 => &ORTHANT_NAMES_1,
        2 => &ORTHANT_NAMES_2,
        3 => &ORTHANT_NAMES_3,
        _ => return None,
    };
    names.iter().position(|&n| n == name)
}
