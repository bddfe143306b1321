use ndarray::{Array1, ArrayView1, Zip};

/// alpha = 1 / (1 + tau/Te), tau = 1/(2*pi*fc)
pub(crate) fn smoothing_factor(te: f32, cutoff: f32) -> f32 {
    let r = 2.0 * std::f32::consts::PI * cutoff * te;
    r / (r + 1.0)
}

/// One Euro Filter over a vector of independent channels.
///
/// Every channel shares the same `min_cutoff`/`beta`/`d_cutoff` but keeps its
/// own value and derivative state. The first sample passes through unchanged.
#[derive(Debug, Clone)]
pub struct OneEuroFilter {
    min_cutoff: f32,
    beta: f32,
    d_cutoff: f32,
    x_prev: Option<Array1<f32>>,
    dx_prev: Option<Array1<f32>>,
}

impl OneEuroFilter {
    pub fn new(min_cutoff: f32, beta: f32, d_cutoff: f32) -> Self {
        Self {
            min_cutoff,
            beta,
            d_cutoff,
            x_prev: None,
            dx_prev: None,
        }
    }

    /// Filter the next sample, `te` time units after the previous one.
    pub fn filter(&mut self, x: ArrayView1<f32>, te: f32) -> Array1<f32> {
        let Some(x_prev) = self.x_prev.as_ref() else {
            self.x_prev = Some(x.to_owned());
            self.dx_prev = Some(Array1::zeros(x.len()));
            return x.to_owned();
        };
        let dx_prev = match self.dx_prev.as_ref() {
            Some(dx) => dx.clone(),
            None => Array1::zeros(x.len()),
        };

        let a_d = smoothing_factor(te, self.d_cutoff);
        let dx_hat = Zip::from(&x)
            .and(x_prev)
            .and(&dx_prev)
            .map_collect(|&x, &xp, &dxp| {
                let dx = if te > 0.0 { (x - xp) / te } else { 0.0 };
                a_d * dx + (1.0 - a_d) * dxp
            });

        let x_hat = Zip::from(&x)
            .and(x_prev)
            .and(&dx_hat)
            .map_collect(|&x, &xp, &dx| {
                let cutoff = self.min_cutoff + self.beta * dx.abs();
                let a = smoothing_factor(te, cutoff);
                a * x + (1.0 - a) * xp
            });

        self.x_prev = Some(x_hat.clone());
        self.dx_prev = Some(dx_hat);
        x_hat
    }

    pub fn reset(&mut self) {
        self.x_prev = None;
        self.dx_prev = None;
    }
}
