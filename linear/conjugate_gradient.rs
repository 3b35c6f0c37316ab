use ndarray::prelude::*;

#[derive(Debug)]
pub struct ConjugateGradientOutput {
	pub solution: Array1<f64>,
	pub n_iterations: usize,
	pub converged: bool,
}

/**
Solve `A x = b` for a symmetric positive definite `A`, which is only available through `apply`, the function computing `A v`. The iteration starts at `initial`.
*/
pub fn conjugate_gradient(
	apply: impl Fn(ArrayView1<f64>) -> Array1<f64>,
	rhs: ArrayView1<f64>,
	initial: Array1<f64>,
	max_iterations: usize,
	tolerance: f64,
) -> ConjugateGradientOutput {
	let mut solution = initial;
	let mut residual = &rhs - &apply(solution.view());
	let mut direction = residual.clone();
	let mut residual_norm_squared = residual.dot(&residual);
	let threshold = tolerance * rhs.dot(&rhs).sqrt();
	let mut n_iterations = 0;
	let mut converged = residual_norm_squared.sqrt() <= threshold;
	while !converged && n_iterations < max_iterations {
		let a_direction = apply(direction.view());
		let curvature = direction.dot(&a_direction);
		if curvature <= 0.0 {
			break;
		}
		let step = residual_norm_squared / curvature;
		solution.scaled_add(step, &direction);
		residual.scaled_add(-step, &a_direction);
		let next_residual_norm_squared = residual.dot(&residual);
		let beta = next_residual_norm_squared / residual_norm_squared;
		direction = &residual + &(direction * beta);
		residual_norm_squared = next_residual_norm_squared;
		n_iterations += 1;
		converged = residual_norm_squared.sqrt() <= threshold;
	}
	ConjugateGradientOutput {
		solution,
		n_iterations,
		converged,
	}
}

#[test]
fn test_conjugate_gradient() {
	let a = arr2(&[[4.0, 1.0], [1.0, 3.0]]);
	let b = arr1(&[1.0, 2.0]);
	let output = conjugate_gradient(|v| a.dot(&v), b.view(), Array1::zeros(2), 10, 1e-12);
	assert!(output.converged);
	assert!(output.n_iterations <= 2);
	assert!((output.solution[0] - 1.0 / 11.0).abs() < 1e-9);
	assert!((output.solution[1] - 7.0 / 11.0).abs() < 1e-9);
}
