//! Numerical integration helpers
//!
//! RK4 and forward Euler over statically sized state vectors, used by the
//! simulated plant (RK4) and the horizon discretization (Euler).

use nalgebra::SVector;

/// Classic 4th-order Runge-Kutta step for dx/dt = f(x)
pub fn rk4<const N: usize, F>(x: &SVector<f64, N>, dt: f64, f: F) -> SVector<f64, N>
where
    F: Fn(&SVector<f64, N>) -> SVector<f64, N>,
{
    let k1 = f(x);
    let k2 = f(&(x + k1 * (dt / 2.0)));
    let k3 = f(&(x + k2 * (dt / 2.0)));
    let k4 = f(&(x + k3 * dt));

    x + (k1 + k2 * 2.0 + k3 * 2.0 + k4) * (dt / 6.0)
}

/// Forward Euler step for dx/dt = f(x)
pub fn euler<const N: usize, F>(x: &SVector<f64, N>, dt: f64, f: F) -> SVector<f64, N>
where
    F: Fn(&SVector<f64, N>) -> SVector<f64, N>,
{
    x + f(x) * dt
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector2;

    #[test]
    fn test_rk4_exponential_decay() {
        // dx/dt = -x, x(1) = e^-1
        let mut x = Vector2::new(1.0, 2.0);
        let dt = 0.01;
        for _ in 0..100 {
            x = rk4(&x, dt, |x| -x);
        }
        assert_relative_eq!(x[0], (-1.0f64).exp(), epsilon = 1e-8);
        assert_relative_eq!(x[1], 2.0 * (-1.0f64).exp(), epsilon = 1e-8);
    }

    #[test]
    fn test_rk4_constant_acceleration() {
        // [position, velocity] under unit acceleration
        let mut x = Vector2::new(0.0, 0.0);
        let dt = 0.1;
        for _ in 0..10 {
            x = rk4(&x, dt, |x| Vector2::new(x[1], 1.0));
        }
        assert_relative_eq!(x[0], 0.5, epsilon = 1e-10);
        assert_relative_eq!(x[1], 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_euler_first_order_accuracy() {
        let x = Vector2::new(1.0, 0.0);
        let next = euler(&x, 0.1, |x| -x);
        assert_relative_eq!(next[0], 0.9, epsilon = 1e-12);
    }
}
