use crate::face::{Corner, Edge, Side};

/// Iterate every coordinate in the half-open box `[start, end)`, first axis
/// fastest. This is the storage order of patch data.
pub fn coord_range<const D: usize>(
    start: [isize; D],
    end: [isize; D],
) -> impl Iterator<Item = [isize; D]> {
    let mut next = start;
    let mut exhausted = start.iter().zip(&end).any(|(s, e)| s >= e);
    std::iter::from_fn(move || {
        if exhausted {
            return None;
        }
        let current = next;
        exhausted = true;
        for axis in 0..D {
            next[axis] += 1;
            if next[axis] < end[axis] {
                exhausted = false;
                break;
            }
            next[axis] = start[axis];
        }
        Some(current)
    })
}

/// Geometry shared by the shared and mutable views: a logical origin into a
/// flat buffer, one stride per axis, interior lengths, and the ghost ring
/// width. Coordinate `(0, .., 0)` is the first interior cell; every
/// coordinate in `[-ghost, len + ghost)` per axis maps to a distinct buffer
/// element.
#[derive(Clone, Copy, Debug)]
struct ViewLayout<const D: usize> {
    base: usize,
    strides: [usize; D],
    lens: [usize; D],
    ghost: usize,
}

impl<const D: usize> ViewLayout<D> {
    fn contiguous(lens: [usize; D], ghost: usize) -> Self {
        let mut strides = [0; D];
        let mut stride = 1;
        for axis in 0..D {
            strides[axis] = stride;
            stride *= lens[axis] + 2 * ghost;
        }
        let base = (0..D).map(|a| ghost * strides[a]).sum();
        Self { base, strides, lens, ghost }
    }

    /// Buffer elements one component block occupies, ghosts included.
    fn block_len(lens: [usize; D], ghost: usize) -> usize {
        lens.iter().map(|n| n + 2 * ghost).product()
    }

    fn in_bounds(&self, coord: [isize; D]) -> bool {
        let g = self.ghost as isize;
        coord
            .iter()
            .zip(&self.lens)
            .all(|(&c, &n)| c >= -g && c < n as isize + g)
    }

    fn offset(&self, coord: [isize; D]) -> usize {
        debug_assert!(
            self.in_bounds(coord),
            "view coordinate {:?} out of bounds for lens {:?} with {} ghost",
            coord,
            self.lens,
            self.ghost
        );
        let mut offset = self.base as isize;
        for axis in 0..D {
            offset += coord[axis] * self.strides[axis] as isize;
        }
        offset as usize
    }

    /// Fix one axis at `coord`, dropping it from the layout.
    fn pinned<const M: usize>(&self, axis: usize, coord: isize) -> ViewLayout<M> {
        let base = (self.base as isize + coord * self.strides[axis] as isize) as usize;
        let mut strides = [0; M];
        let mut lens = [0; M];
        let mut m = 0;
        for a in 0..D {
            if a != axis {
                strides[m] = self.strides[a];
                lens[m] = self.lens[a];
                m += 1;
            }
        }
        ViewLayout { base, strides, lens, ghost: self.ghost }
    }

    /// Coordinate on `side.axis()` of the slice layer `layer` layers in from
    /// that side (0 = first interior, -1 = first ghost).
    fn layer_coord(&self, axis: usize, upper: bool, layer: isize) -> isize {
        if upper {
            self.lens[axis] as isize - 1 - layer
        } else {
            layer
        }
    }
}

/// A read-only strided view of one component of one patch, indexable by
/// ghost coordinates.
#[derive(Clone, Copy)]
pub struct ComponentView<'a, const D: usize> {
    data: &'a [f64],
    layout: ViewLayout<D>,
}

/// The mutable counterpart of [`ComponentView`]. Slices borrow from the
/// parent view, so writes through a slice land in the parent's storage.
pub struct ComponentViewMut<'a, const D: usize> {
    data: &'a mut [f64],
    layout: ViewLayout<D>,
}

macro_rules! view_common {
    ($view:ident) => {
        impl<'a, const D: usize> $view<'a, D> {
            /// Interior length per axis.
            pub fn lens(&self) -> [usize; D] {
                self.layout.lens
            }

            pub fn num_ghost_cells(&self) -> usize {
                self.layout.ghost
            }

            /// First interior coordinate (all zeros).
            pub fn start(&self) -> [isize; D] {
                [0; D]
            }

            /// One past the last interior coordinate.
            pub fn end(&self) -> [isize; D] {
                self.layout.lens.map(|n| n as isize)
            }

            /// First ghost coordinate.
            pub fn ghost_start(&self) -> [isize; D] {
                [-(self.layout.ghost as isize); D]
            }

            /// One past the last ghost coordinate.
            pub fn ghost_end(&self) -> [isize; D] {
                self.layout.lens.map(|n| (n + self.layout.ghost) as isize)
            }

            pub fn get(&self, coord: [isize; D]) -> f64 {
                self.data[self.layout.offset(coord)]
            }

            /// Every interior coordinate, first axis fastest.
            pub fn interior(&self) -> impl Iterator<Item = [isize; D]> {
                coord_range(self.start(), self.end())
            }

            /// Every coordinate including the ghost ring.
            pub fn with_ghost(&self) -> impl Iterator<Item = [isize; D]> {
                coord_range(self.ghost_start(), self.ghost_end())
            }
        }
    };
}

view_common!(ComponentView);
view_common!(ComponentViewMut);

impl<'a, const D: usize> ComponentView<'a, D> {
    /// View over a contiguous component block laid out first-axis-fastest
    /// with a ghost ring on every axis. `data` must hold exactly the block.
    pub fn new(data: &'a [f64], lens: [usize; D], ghost: usize) -> Self {
        assert_eq!(data.len(), ViewLayout::<D>::block_len(lens, ghost));
        Self { data, layout: ViewLayout::contiguous(lens, ghost) }
    }

    fn pinned<const M: usize>(&self, axis: usize, coord: isize) -> ComponentView<'a, M> {
        ComponentView { data: self.data, layout: self.layout.pinned(axis, coord) }
    }
}

impl<'a, const D: usize> ComponentViewMut<'a, D> {
    pub fn new(data: &'a mut [f64], lens: [usize; D], ghost: usize) -> Self {
        assert_eq!(data.len(), ViewLayout::<D>::block_len(lens, ghost));
        let layout = ViewLayout::contiguous(lens, ghost);
        Self { data, layout }
    }

    pub fn set(&mut self, coord: [isize; D], value: f64) {
        let offset = self.layout.offset(coord);
        self.data[offset] = value;
    }

    pub fn add(&mut self, coord: [isize; D], value: f64) {
        let offset = self.layout.offset(coord);
        self.data[offset] += value;
    }

    /// A read-only view of the same storage.
    pub fn as_view(&self) -> ComponentView<'_, D> {
        ComponentView { data: self.data, layout: self.layout }
    }

    fn pinned<const M: usize>(&mut self, axis: usize, coord: isize) -> ComponentViewMut<'_, M> {
        let layout = self.layout.pinned(axis, coord);
        ComponentViewMut { data: &mut *self.data, layout }
    }
}

impl<'a, const D: usize> std::ops::Index<[isize; D]> for ComponentView<'a, D> {
    type Output = f64;

    fn index(&self, coord: [isize; D]) -> &f64 {
        &self.data[self.layout.offset(coord)]
    }
}

impl<'a, const D: usize> std::ops::Index<[isize; D]> for ComponentViewMut<'a, D> {
    type Output = f64;

    fn index(&self, coord: [isize; D]) -> &f64 {
        &self.data[self.layout.offset(coord)]
    }
}

impl<'a, const D: usize> std::ops::IndexMut<[isize; D]> for ComponentViewMut<'a, D> {
    fn index_mut(&mut self, coord: [isize; D]) -> &mut f64 {
        let offset = self.layout.offset(coord);
        &mut self.data[offset]
    }
}

// Slicing onto faces changes the view's rank, so the slice methods are
// provided per dimension rather than generically.

impl<'a> ComponentView<'a, 2> {
    /// The 1D line `layer` layers in from `side`; `layer` -1 is the first
    /// ghost layer. The line is itself addressable into the ghost ring of
    /// its tangential axis.
    pub fn slice_on(&self, side: Side<2>, layer: isize) -> ComponentView<'a, 1> {
        let axis = side.axis();
        self.pinned(axis, self.layout.layer_coord(axis, side.upper_side(), layer))
    }

    /// The single cell `layer` layers diagonally in from `corner`.
    pub fn slice_on_corner(&self, corner: Corner<2>, layer: isize) -> ComponentView<'a, 0> {
        let [s0, s1] = corner.sides();
        self.slice_on(s0, layer)
            .pinned(0, self.layout.layer_coord(s1.axis(), s1.upper_side(), layer))
    }
}

impl<'a> ComponentView<'a, 3> {
    pub fn slice_on(&self, side: Side<3>, layer: isize) -> ComponentView<'a, 2> {
        let axis = side.axis();
        self.pinned(axis, self.layout.layer_coord(axis, side.upper_side(), layer))
    }

    /// The 1D line `layer` layers in from `edge`, running along the edge's
    /// tangent axis.
    pub fn slice_on_edge(&self, edge: Edge, layer: isize) -> ComponentView<'a, 1> {
        let [(a1, up1), (a2, up2)] = edge.fixed_axes();
        // Pin the higher axis first so the lower axis index is unchanged.
        self.pinned::<2>(a2, self.layout.layer_coord(a2, up2, layer))
            .pinned(a1, self.layout.layer_coord(a1, up1, layer))
    }

    pub fn slice_on_corner(&self, corner: Corner<3>, layer: isize) -> ComponentView<'a, 0> {
        let [s0, s1, s2] = corner.sides();
        self.pinned::<2>(s2.axis(), self.layout.layer_coord(s2.axis(), s2.upper_side(), layer))
            .pinned::<1>(s1.axis(), self.layout.layer_coord(s1.axis(), s1.upper_side(), layer))
            .pinned(s0.axis(), self.layout.layer_coord(s0.axis(), s0.upper_side(), layer))
    }
}

impl<'a> ComponentViewMut<'a, 2> {
    pub fn slice_on(&mut self, side: Side<2>, layer: isize) -> ComponentViewMut<'_, 1> {
        let axis = side.axis();
        let coord = self.layout.layer_coord(axis, side.upper_side(), layer);
        self.pinned(axis, coord)
    }

    pub fn slice_on_corner(&mut self, corner: Corner<2>, layer: isize) -> ComponentViewMut<'_, 0> {
        let [s0, s1] = corner.sides();
        let c0 = self.layout.layer_coord(s0.axis(), s0.upper_side(), layer);
        let c1 = self.layout.layer_coord(s1.axis(), s1.upper_side(), layer);
        let layout = self.layout.pinned::<1>(s1.axis(), c1).pinned(0, c0);
        ComponentViewMut { data: &mut *self.data, layout }
    }
}

impl<'a> ComponentViewMut<'a, 3> {
    pub fn slice_on(&mut self, side: Side<3>, layer: isize) -> ComponentViewMut<'_, 2> {
        let axis = side.axis();
        let coord = self.layout.layer_coord(axis, side.upper_side(), layer);
        self.pinned(axis, coord)
    }

    pub fn slice_on_edge(&mut self, edge: Edge, layer: isize) -> ComponentViewMut<'_, 1> {
        let [(a1, up1), (a2, up2)] = edge.fixed_axes();
        let c1 = self.layout.layer_coord(a1, up1, layer);
        let c2 = self.layout.layer_coord(a2, up2, layer);
        let layout = self.layout.pinned::<2>(a2, c2).pinned(a1, c1);
        ComponentViewMut { data: &mut *self.data, layout }
    }

    pub fn slice_on_corner(&mut self, corner: Corner<3>, layer: isize) -> ComponentViewMut<'_, 0> {
        let [s0, s1, s2] = corner.sides();
        let c0 = self.layout.layer_coord(s0.axis(), s0.upper_side(), layer);
        let c1 = self.layout.layer_coord(s1.axis(), s1.upper_side(), layer);
        let c2 = self.layout.layer_coord(s2.axis(), s2.upper_side(), layer);
        let layout = self
            .layout
            .pinned::<2>(s2.axis(), c2)
            .pinned::<1>(s1.axis(), c1)
            .pinned(s0.axis(), c0);
        ComponentViewMut { data: &mut *self.data, layout }
    }
}

/// All components of one patch. Component blocks are contiguous and
/// identically laid out; `component(c)` narrows to one of them.
pub struct PatchView<'a, const D: usize> {
    data: &'a [f64],
    lens: [usize; D],
    ghost: usize,
    num_components: usize,
}

pub struct PatchViewMut<'a, const D: usize> {
    data: &'a mut [f64],
    lens: [usize; D],
    ghost: usize,
    num_components: usize,
}

impl<'a, const D: usize> PatchView<'a, D> {
    pub fn new(data: &'a [f64], lens: [usize; D], ghost: usize, num_components: usize) -> Self {
        assert_eq!(data.len(), num_components * ViewLayout::<D>::block_len(lens, ghost));
        Self { data, lens, ghost, num_components }
    }

    pub fn num_components(&self) -> usize {
        self.num_components
    }

    pub fn component(&self, c: usize) -> ComponentView<'a, D> {
        let block = ViewLayout::<D>::block_len(self.lens, self.ghost);
        ComponentView::new(&self.data[c * block..(c + 1) * block], self.lens, self.ghost)
    }
}

impl<'a, const D: usize> PatchViewMut<'a, D> {
    pub fn new(data: &'a mut [f64], lens: [usize; D], ghost: usize, num_components: usize) -> Self {
        assert_eq!(data.len(), num_components * ViewLayout::<D>::block_len(lens, ghost));
        Self { data, lens, ghost, num_components }
    }

    pub fn num_components(&self) -> usize {
        self.num_components
    }

    pub fn component(&mut self, c: usize) -> ComponentViewMut<'_, D> {
        let block = ViewLayout::<D>::block_len(self.lens, self.ghost);
        ComponentViewMut::new(&mut self.data[c * block..(c + 1) * block], self.lens, self.ghost)
    }

    /// A read-only view of the same storage.
    pub fn as_view(&self) -> PatchView<'_, D> {
        PatchView {
            data: self.data,
            lens: self.lens,
            ghost: self.ghost,
            num_components: self.num_components,
        }
    }
}
