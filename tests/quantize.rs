//! Properties of the fixed-point conversion arithmetic.

use edgegrad::quantize::{
    dequantize_slice, float_to_quantized, float_to_quantized_unclamped, quantize_down_and_shrink_range,
    quantize_slice, quantized_to_float, range_for_multiplication, QRange,
};
use edgegrad::tensors::Float;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[test]
fn test_round_trip_error_bounded_by_one_step() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    for _ in 0..200 {
        let a: Float = rng.random_range(-100.0..100.0);
        let b: Float = rng.random_range(-100.0..100.0);
        let range = QRange::new(a.min(b), a.max(b));
        let step = range.span() / 255.0;

        let v: Float = rng.random_range(range.min..=range.max);
        let q: u8 = float_to_quantized(v, range);
        let back = quantized_to_float(q, range);
        assert!(
            (back - v).abs() <= step * 1.001,
            "{v} in [{}, {}] -> {q} -> {back}",
            range.min,
            range.max
        );
    }
}

#[test]
fn test_out_of_range_values_saturate() {
    let range = QRange::new(-1.0, 1.0);
    let low: u8 = float_to_quantized(-50.0, range);
    let high: u8 = float_to_quantized(50.0, range);
    assert_eq!(low, u8::MIN);
    assert_eq!(high, u8::MAX);
}

#[test]
fn test_multiplication_range_bounds_accumulator() {
    let mut rng = StdRng::seed_from_u64(17);
    let range_a = QRange::new(-3.0, 5.0);
    let range_b = QRange::new(-0.7, 0.2);
    let acc_range = range_for_multiplication::<u8, u8, i32>(range_a, range_b);

    let zero_a = float_to_quantized_unclamped::<u8>(0.0, range_a);
    let zero_b = float_to_quantized_unclamped::<u8>(0.0, range_b);

    for _ in 0..50 {
        let a: Vec<Float> = (0..16).map(|_| rng.random_range(range_a.min..range_a.max)).collect();
        let b: Vec<Float> = (0..16).map(|_| rng.random_range(range_b.min..range_b.max)).collect();
        let qa = quantize_slice::<u8>(&a, range_a);
        let qb = quantize_slice::<u8>(&b, range_b);

        // offset-corrected integer dot product, as the quantized kernel
        // accumulates it
        let acc: i64 = qa
            .iter()
            .zip(qb.iter())
            .map(|(&x, &y)| (i64::from(x) - zero_a) * (i64::from(y) - zero_b))
            .sum();
        assert!(acc >= i32::MIN as i64 && acc <= i32::MAX as i64);

        let float_dot: Float = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        // the analytic multiplication range decodes the raw accumulator
        // directly, no zero offset needed
        let decoded = quantized_to_float::<i32>(acc as i32, acc_range);
        // per-term error is bounded by half an 8-bit step of each operand
        // scaled by the other operand's magnitude
        let a_step = range_a.span() / 255.0;
        let b_step = range_b.span() / 255.0;
        let tolerance = 16.0 * (5.0 * b_step + 0.7 * a_step);
        assert!(
            (decoded - float_dot).abs() <= tolerance,
            "dot {float_dot} decoded as {decoded}"
        );
    }
}

#[test]
fn test_shrink_preserves_encoded_values() {
    let wide = QRange::new(-40.0, 40.0);
    let values: Vec<Float> = vec![-2.5, -0.25, 0.0, 0.75, 3.125];
    let acc: Vec<i32> = values
        .iter()
        .map(|&v| float_to_quantized::<i32>(v, wide))
        .collect();

    let (narrow, realized) = quantize_down_and_shrink_range(&acc, wide);
    assert!(realized.span() < wide.span());
    assert!(realized.min <= 0.0);

    let step = realized.span() / 255.0;
    let decoded = dequantize_slice::<u8>(&narrow, realized);
    for (d, v) in decoded.iter().zip(values.iter()) {
        assert!(
            (d - v).abs() <= step * 1.5,
            "{v} came back as {d} (step {step})"
        );
    }
}

#[test]
fn test_empty_accumulator_yields_finite_range() {
    let (q, range) = quantize_down_and_shrink_range(&[], QRange::new(-1.0, 1.0));
    assert!(q.is_empty());
    assert!(range.span() > 0.0 && range.min.is_finite() && range.max.is_finite());
}
