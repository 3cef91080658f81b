//! Flat static KD-tree for 2D range and radius queries.
//!
//! Built once per clustering level and never mutated afterwards; the index
//! rebuilds the whole structure when the feature set changes.

/// A very fast static spatial index over 2D points.
///
/// Point order is fixed at build time; queries return indices into the
/// original point slice.
#[derive(Clone, Debug, Default)]
pub struct KdTree {
    /// Number of points in a leaf node, affects query performance
    node_size: usize,

    /// Point indices, permuted into KD-tree order
    ids: Vec<usize>,

    /// Interleaved x/y coordinates, permuted alongside `ids`
    coords: Vec<f64>,
}

impl KdTree {
    /// Build the tree from a slice of `(x, y)` pairs.
    ///
    /// Expected O(n log n); an empty slice produces a valid empty tree.
    ///
    /// # Arguments
    ///
    /// - `points`: The points to index; query results are indices into this slice.
    /// - `node_size`: The number of points in a leaf node.
    pub fn build(points: &[(f64, f64)], node_size: usize) -> Self {
        let mut ids = Vec::with_capacity(points.len());
        let mut coords = Vec::with_capacity(points.len() * 2);

        for (i, (x, y)) in points.iter().enumerate() {
            ids.push(i);
            coords.push(*x);
            coords.push(*y);
        }

        let mut tree = KdTree {
            node_size,
            ids,
            coords,
        };

        if tree.ids.len() > 1 {
            tree.sort(0, tree.ids.len() - 1, 0);
        }

        tree
    }

    /// Number of indexed points.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the tree holds no points.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Indices of all points inside the axis-aligned box (inclusive).
    ///
    /// # Arguments
    ///
    /// - `min_x`: The minimum X coordinate of the box.
    /// - `min_y`: The minimum Y coordinate of the box.
    /// - `max_x`: The maximum X coordinate of the box.
    /// - `max_y`: The maximum Y coordinate of the box.
    pub fn range(&self, min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Vec<usize> {
        if self.ids.is_empty() {
            return Vec::new();
        }

        let mut stack = vec![(0usize, self.ids.len() - 1, 0usize)];
        let mut result = Vec::new();

        while let Some((axis, right, left)) = stack.pop() {
            if right - left <= self.node_size {
                for i in left..=right {
                    let x = self.coords[i * 2];
                    let y = self.coords[i * 2 + 1];

                    if x >= min_x && x <= max_x && y >= min_y && y <= max_y {
                        result.push(self.ids[i]);
                    }
                }
                continue;
            }

            let m = (left + right) >> 1;
            let x = self.coords[m * 2];
            let y = self.coords[m * 2 + 1];

            if x >= min_x && x <= max_x && y >= min_y && y <= max_y {
                result.push(self.ids[m]);
            }

            let next_axis = (axis + 1) % 2;

            if (axis == 0 && min_x <= x) || (axis != 0 && min_y <= y) {
                stack.push((next_axis, m - 1, left));
            }

            if (axis == 0 && max_x >= x) || (axis != 0 && max_y >= y) {
                stack.push((next_axis, right, m + 1));
            }
        }

        result
    }

    /// Indices of all points within `radius` of the query point.
    ///
    /// # Arguments
    ///
    /// - `qx`: The X coordinate of the query point.
    /// - `qy`: The Y coordinate of the query point.
    /// - `radius`: The search radius around the query point.
    pub fn within(&self, qx: f64, qy: f64, radius: f64) -> Vec<usize> {
        if self.ids.is_empty() {
            return Vec::new();
        }

        let mut stack = vec![(0usize, self.ids.len() - 1, 0usize)];
        let mut result = Vec::new();
        let r2 = radius * radius;

        while let Some((axis, right, left)) = stack.pop() {
            if right - left <= self.node_size {
                for i in left..=right {
                    let x = self.coords[i * 2];
                    let y = self.coords[i * 2 + 1];

                    if sq_dist(x, y, qx, qy) <= r2 {
                        result.push(self.ids[i]);
                    }
                }
                continue;
            }

            let m = (left + right) >> 1;
            let x = self.coords[m * 2];
            let y = self.coords[m * 2 + 1];

            if sq_dist(x, y, qx, qy) <= r2 {
                result.push(self.ids[m]);
            }

            let next_axis = (axis + 1) % 2;

            if (axis == 0 && qx - radius <= x) || (axis != 0 && qy - radius <= y) {
                stack.push((next_axis, m - 1, left));
            }

            if (axis == 0 && qx + radius >= x) || (axis != 0 && qy + radius >= y) {
                stack.push((next_axis, right, m + 1));
            }
        }

        result
    }

    /// Recursively partition points along alternating axes until ranges fit
    /// in a leaf node.
    ///
    /// # Arguments
    ///
    /// - `left`: The left index of the range to partition.
    /// - `right`: The right index of the range to partition.
    /// - `axis`: The axis to partition along (0 for X or 1 for Y).
    fn sort(&mut self, left: usize, right: usize, axis: usize) {
        if right - left <= self.node_size {
            return;
        }

        let m = (left + right) >> 1;

        self.select(m, left, right, axis);

        self.sort(left, m - 1, 1 - axis);
        self.sort(m + 1, right, 1 - axis);
    }

    /// Floyd-Rivest selection: move the k-th smallest element (along `axis`)
    /// into position `k`, partitioning the rest around it.
    ///
    /// # Arguments
    ///
    /// - `k`: The index of the element to be selected.
    /// - `left`: The left index for the range of points.
    /// - `right`: The right index for the range of points.
    /// - `axis`: The axis along which the selection should be performed (0 for X or 1 for Y).
    fn select(&mut self, k: usize, left: usize, right: usize, axis: usize) {
        let mut left = left;
        let mut right = right;

        while right > left {
            if right - left > 600 {
                let n = (right - left + 1) as f64;
                let m = (k - left + 1) as f64;
                let z = n.ln();
                let s = 0.5 * ((2.0 * z) / 3.0).exp();
                let sd = 0.5 * ((z * s * (n - s)) / n).sqrt() * if m - n / 2.0 < 0.0 { -1.0 } else { 1.0 };
                let new_left = left.max(((k as f64) - (m * s) / n + sd).floor() as usize);
                let new_right = right.min(((k as f64) + ((n - m) * s) / n + sd).floor() as usize);

                self.select(k, new_left, new_right, axis);
            }

            let t = self.coords[2 * k + axis];
            let mut i = left;
            let mut j = right;

            self.swap_item(left, k);

            if self.coords[2 * right + axis] > t {
                self.swap_item(left, right);
            }

            while i < j {
                self.swap_item(i, j);

                i += 1;
                j -= 1;

                while self.coords[2 * i + axis] < t {
                    i += 1;
                }

                while self.coords[2 * j + axis] > t {
                    j -= 1;
                }
            }

            if self.coords[2 * left + axis] == t {
                self.swap_item(left, j);
            } else {
                j += 1;
                self.swap_item(j, right);
            }

            if j <= k {
                left = j + 1;
            }
            if k <= j {
                right = j - 1;
            }
        }
    }

    /// Swap two points, keeping ids and interleaved coordinates aligned.
    ///
    /// # Arguments
    ///
    /// - `i`: The index of the first element.
    /// - `j`: The index of the second element.
    fn swap_item(&mut self, i: usize, j: usize) {
        self.ids.swap(i, j);
        self.coords.swap(2 * i, 2 * j);
        self.coords.swap(2 * i + 1, 2 * j + 1);
    }
}

/// Squared Euclidean distance between two points.
///
/// # Arguments
///
/// - `ax`, `ay`: The coordinates of the first point.
/// - `bx`, `by`: The coordinates of the second point.
fn sq_dist(ax: f64, ay: f64, bx: f64, by: f64) -> f64 {
    let dx = ax - bx;
    let dy = ay - by;

    dx * dx + dy * dy
}
