//! 文字锚点之间的几何判断。所有容差都由调用方传入。

use rpstl_core::document::TextLabel;
use rpstl_core::geometry::Point2;

/// 文字的插入点与对齐点。没有独立对齐点的文字两者相同。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextAnchor {
    pub position: Point2,
    pub alignment: Point2,
}

impl TextAnchor {
    #[inline]
    pub fn new(position: Point2, alignment: Point2) -> Self {
        Self {
            position,
            alignment,
        }
    }

    #[inline]
    pub fn at(position: Point2) -> Self {
        Self::new(position, position)
    }
}

impl From<&TextLabel> for TextAnchor {
    fn from(text: &TextLabel) -> Self {
        Self::new(text.insert, text.alignment_point())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
}

impl Axis {
    #[inline]
    fn pick(self, point: Point2) -> f64 {
        match self {
            Axis::X => point.x(),
            Axis::Y => point.y(),
        }
    }

    #[inline]
    fn other(self) -> Axis {
        match self {
            Axis::X => Axis::Y,
            Axis::Y => Axis::X,
        }
    }
}

/// 由左下角与右上角定义的闭矩形。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub min: Point2,
    pub max: Point2,
}

impl Rect {
    pub fn new(llx: f64, lly: f64, trx: f64, try_: f64) -> Self {
        Self {
            min: Point2::new(llx, lly),
            max: Point2::new(trx, try_),
        }
    }

    pub fn from_corners(a: Point2, b: Point2) -> Self {
        Self::new(
            a.x().min(b.x()),
            a.y().min(b.y()),
            a.x().max(b.x()),
            a.y().max(b.y()),
        )
    }

    /// 边界上的点视为在内。
    pub fn contains(&self, point: Point2) -> bool {
        point.x() >= self.min.x()
            && point.x() <= self.max.x()
            && point.y() >= self.min.y()
            && point.y() <= self.max.y()
    }

    /// 锚点左上方的区域：`[x - dx, y] .. [x, y + dy]`。
    pub fn left_zone(anchor: Point2, x_range: f64, y_range: f64) -> Self {
        Self::new(
            anchor.x() - x_range,
            anchor.y(),
            anchor.x(),
            anchor.y() + y_range,
        )
    }

    /// 锚点右上方的区域：`[x, y] .. [x + dx, y + dy]`。
    pub fn right_zone(anchor: Point2, x_range: f64, y_range: f64) -> Self {
        Self::new(
            anchor.x(),
            anchor.y(),
            anchor.x() + x_range,
            anchor.y() + y_range,
        )
    }

    /// 以某点为基准向四个方向分别扩展。
    pub fn around(anchor: Point2, left: f64, down: f64, right: f64, up: f64) -> Self {
        Self::new(
            anchor.x() - left,
            anchor.y() - down,
            anchor.x() + right,
            anchor.y() + up,
        )
    }
}

/// `a` 是否位于 `b` 正上方：插入点更高，对齐点同列，且对齐点高差小于 `y_range`。
pub fn is_above(a: &TextAnchor, b: &TextAnchor, y_range: f64, x_epsilon: f64) -> bool {
    a.position.y() > b.position.y()
        && same_column(a.alignment, b.alignment, x_epsilon)
        && a.alignment.y().abs() - b.alignment.y().abs() < y_range
}

#[inline]
pub fn is_in_rect(point: Point2, rect: &Rect) -> bool {
    rect.contains(point)
}

/// `candidate` 是否严格位于 `low` 与 `high` 之间，且三者在另一轴上对齐。
pub fn is_between(candidate: Point2, low: Point2, high: Point2, axis: Axis, epsilon: f64) -> bool {
    let cross = axis.other();
    let lined_up = (cross.pick(candidate) - cross.pick(low)).abs() <= epsilon
        && (cross.pick(low) - cross.pick(high)).abs() <= epsilon;
    let (lo, hi) = {
        let a = axis.pick(low);
        let b = axis.pick(high);
        (a.min(b), a.max(b))
    };
    let value = axis.pick(candidate);
    lined_up && value > lo && value < hi
}

#[inline]
pub fn same_column(a: Point2, b: Point2, epsilon: f64) -> bool {
    (a.x() - b.x()).abs() <= epsilon
}
