//! 線分と球の交差判定（視線遮蔽判定）

use crate::models::common::Position3D;

/// 線分 `p1`–`p2` が閉球（中心 `center`, 半径 `radius`）と交差するかを判定します。
///
/// 線分を `p(s) = p1 + s (p2 - p1)`, `s ∈ [0, 1]` とおき、
/// `|p(s) - center|² = radius²` の二次方程式を解きます。
///
/// - `p1 == p2` の縮退線分は常に `false`
/// - 接する場合（判別式 0）は交差とみなす
/// - 根のいずれかが `[0, 1]` にあるか、球が線分全体を内包する（`s1 < 0 かつ s2 > 1`）場合に `true`
pub fn segment_intersects_sphere(p1: Position3D, p2: Position3D, center: Position3D, radius: f64) -> bool {
    let v = p2 - p1;
    let a = v.dot(&v);
    if a == 0.0 {
        return false;
    }

    let offset = p1 - center;
    let b = 2.0 * v.dot(&offset);
    let c = offset.dot(&offset) - radius * radius;

    let discriminant = b * b - 4.0 * a * c;
    if discriminant < 0.0 {
        return false;
    }

    let root = discriminant.sqrt();
    let s1 = (-b - root) / (2.0 * a);
    let s2 = (-b + root) / (2.0 * a);

    (0.0..=1.0).contains(&s1) || (0.0..=1.0).contains(&s2) || (s1 < 0.0 && s2 > 1.0)
}
