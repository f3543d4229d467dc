use num_traits::Float;

/// Centred moving average with an odd `window`; the window shrinks
/// symmetrically near both ends so the first and last values stay fixed.
pub fn moving_average<T: Float>(values: &[T], window: usize) -> Vec<T> {
    let half = window / 2;
    let n = values.len();

    (0..n)
        .map(|i| {
            let reach = half.min(i).min(n - 1 - i);
            let slice = &values[i - reach..=i + reach];
            let sum = slice.iter().fold(T::zero(), |acc, v| acc + *v);

            sum / T::from(slice.len()).unwrap_or_else(T::one)
        })
        .collect()
}
