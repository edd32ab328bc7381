use crate::bounds::BoundingBox;
use crate::dot::DIM;
use crate::tree::CutTree;

/// Fixed order in which cut directions are used.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DirectionOrder {
    Xyz = 1,
    Xzy = 2,
    Yzx = 3,
    Yxz = 4,
    Zxy = 5,
    Zyx = 6,
}

impl DirectionOrder {
    /// Ordering for codes 1 to 6; 0 and anything else means no preset order.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(DirectionOrder::Xyz),
            2 => Some(DirectionOrder::Xzy),
            3 => Some(DirectionOrder::Yzx),
            4 => Some(DirectionOrder::Yxz),
            5 => Some(DirectionOrder::Zxy),
            6 => Some(DirectionOrder::Zyx),
            _ => None,
        }
    }

    pub fn axes(self) -> [usize; DIM] {
        match self {
            DirectionOrder::Xyz => [0, 1, 2],
            DirectionOrder::Xzy => [0, 2, 1],
            DirectionOrder::Yzx => [1, 2, 0],
            DirectionOrder::Yxz => [1, 0, 2],
            DirectionOrder::Zxy => [2, 0, 1],
            DirectionOrder::Zyx => [2, 1, 0],
        }
    }
}

/// Axis of largest extent; ties go to the lower axis.
pub fn longest_axis(bbox: &BoundingBox) -> usize {
    let mut dim = 0;
    for axis in 1..DIM {
        if bbox.extent(axis) > bbox.extent(dim) { dim = axis; }
    }
    dim
}

/// Cut axis for every bisection level when directions follow a fixed order.
///
/// The number of levels is the number of halvings (rounding up) that bring
/// `num_parts` down to one. Each level is charged to the axis whose remaining width
/// is strictly the largest, z before y, x otherwise, and that width is halved. The
/// cuts charged to each axis are then issued in `order`.
pub fn preset_sequence(num_parts: usize, order: DirectionOrder, bbox: &BoundingBox) -> Vec<usize> {
    let mut width = [bbox.extent(0), bbox.extent(1), bbox.extent(2)];
    let mut count = [0usize; DIM];
    let mut remaining = num_parts;
    while remaining > 1 {
        remaining = remaining.div_ceil(2);
        let axis = if width[2] > width[0] && width[2] > width[1] {
            2
        } else if width[1] > width[0] && width[1] > width[2] {
            1
        } else {
            0
        };
        count[axis] += 1;
        width[axis] /= 2.0;
    }
    order
        .axes()
        .iter()
        .flat_map(|&axis| std::iter::repeat_n(axis, count[axis]))
        .collect()
}

/// Chooses the axis of each cut.
///
/// Locked directions from a previous tree win over a preset order, which wins over
/// the longest-extent rule. The longest extent is also the fallback when the previous
/// tree has no cut at a slot or the preset order is exhausted.
#[derive(Clone, Debug, Default)]
pub(crate) struct DirectionSelector<'a> {
    locked: Option<&'a CutTree>,
    preset: Option<Vec<usize>>,
}

impl<'a> DirectionSelector<'a> {
    pub fn new(locked: Option<&'a CutTree>, preset: Option<Vec<usize>>) -> Self {
        Self { locked, preset }
    }

    /// Axis for the cut that will be stored at `partmid`, made at bisection `level`.
    pub fn select(&self, partmid: usize, level: usize, bbox: &BoundingBox) -> usize {
        if let Some(tree) = self.locked {
            if let Some((dim, _)) = tree.cut_at(partmid) {
                return dim;
            }
        } else if let Some(seq) = &self.preset {
            if let Some(&dim) = seq.get(level) {
                return dim;
            }
        }
        longest_axis(bbox)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_longest_axis_ties_go_low() {
        assert_eq!(longest_axis(&BoundingBox::new([0.0; 3], [1.0, 2.0, 2.0])), 1);
        assert_eq!(longest_axis(&BoundingBox::new([0.0; 3], [1.0, 1.0, 1.0])), 0);
        assert_eq!(longest_axis(&BoundingBox::new([0.0; 3], [1.0, 1.0, 3.0])), 2);
    }

    #[test]
    fn test_preset_sequence_counts_halvings() {
        // 8 parts take 3 levels, one charged to each axis of this box.
        let b = BoundingBox::new([0.0; 3], [1.0, 1.5, 2.0]);
        assert_eq!(preset_sequence(8, DirectionOrder::Xyz, &b), vec![0, 1, 2]);
        assert_eq!(preset_sequence(8, DirectionOrder::Zyx, &b), vec![2, 1, 0]);
        assert_eq!(preset_sequence(8, DirectionOrder::Yxz, &b), vec![1, 0, 2]);
        // 5 -> 3 -> 2 -> 1.
        assert_eq!(preset_sequence(5, DirectionOrder::Xyz, &b).len(), 3);
        assert!(preset_sequence(1, DirectionOrder::Xyz, &b).is_empty());

        // Equal widths never win strictly, so a cube is cut along x only.
        let cube = BoundingBox::new([0.0; 3], [1.0; 3]);
        assert_eq!(preset_sequence(4, DirectionOrder::Zyx, &cube), vec![0, 0]);
    }

    #[test]
    fn test_preset_sequence_follows_widths() {
        let slab = BoundingBox::new([0.0; 3], [8.0, 1.0, 1.0]);
        assert_eq!(preset_sequence(8, DirectionOrder::Zyx, &slab), vec![0, 0, 0]);
        let tall = BoundingBox::new([0.0; 3], [1.0, 1.0, 4.0]);
        assert_eq!(preset_sequence(8, DirectionOrder::Xyz, &tall), vec![0, 2, 2]);
    }

    #[test]
    fn test_selector_falls_back_to_longest() {
        let bbox = BoundingBox::new([0.0; 3], [1.0, 5.0, 1.0]);
        let selector = DirectionSelector::new(None, Some(vec![2]));
        assert_eq!(selector.select(1, 0, &bbox), 2);
        assert_eq!(selector.select(1, 1, &bbox), 1);

        let tree = CutTree::assemble(2, Vec::new());
        let locked = DirectionSelector::new(Some(&tree), None);
        assert_eq!(locked.select(1, 0, &bbox), 1);
    }
}
