#[macro_export]
macro_rules! tvec {
    // count helper: transform any expression into 1
    (@one $x:expr) => (1usize);
    ($elem:expr; $n:expr) => ({
        $crate::TVec::from_elem($elem, $n)
    });
    ($($x:expr),*$(,)*) => ({
        let count = 0usize $(+ tvec!(@one $x))*;
        #[allow(unused_mut)]
        let mut vec = $crate::TVec::new();
        if count <= vec.inline_size() {
            $(vec.push($x);)*
            vec
        } else {
            $crate::TVec::from_vec(vec![$($x,)*])
        }
    });
}

/// Build a `Shape` from a list of axes, `_` standing for an unknown axis.
///
/// ```
/// # use recur_data::prelude::*;
/// let s = shape!(32, _, 8);
/// assert_eq!(s.to_string(), "32x?x8");
/// ```
#[macro_export]
macro_rules! shape {
    (@axis _) => (None);
    (@axis $x:expr) => (Some($x as usize));
    ($($x:tt),*$(,)*) => ({
        $crate::prelude::Shape::from_dims([$($crate::shape!(@axis $x)),*])
    });
}
