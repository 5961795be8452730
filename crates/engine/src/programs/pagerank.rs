use tessera_core::Consistency;

use crate::program::VertexProgram;
use crate::scope::Scope;

/// Dynamic PageRank over `f64` vertex data.
///
/// Each update recomputes the centre's rank from its in-neighbours. When the
/// rank moves by more than `tolerance`, the out-neighbours are rescheduled with
/// the size of the change as priority, so the priority scheduler works on the
/// largest residuals first.
#[derive(Debug, Clone)]
pub struct PageRank {
    pub damping: f64,
    pub tolerance: f64,
}

impl Default for PageRank {
    fn default() -> Self {
        Self {
            damping: 0.85,
            tolerance: 1e-6,
        }
    }
}

impl PageRank {
    pub fn new(damping: f64, tolerance: f64) -> Self {
        Self { damping, tolerance }
    }

    /// Uniform starting rank for a graph of `n` vertices.
    pub fn initial_rank(n: usize) -> f64 {
        if n == 0 {
            0.0
        } else {
            1.0 / n as f64
        }
    }
}

impl<E: Send + Sync> VertexProgram<f64, E> for PageRank {
    fn name(&self) -> &str {
        "pagerank"
    }

    fn consistency(&self) -> Option<Consistency> {
        Some(Consistency::Edge)
    }

    fn update(&self, scope: &mut Scope<'_, f64, E>) -> anyhow::Result<()> {
        let me = scope.vertex();
        let n = scope.num_vertices() as f64;

        let mut sum = 0.0;
        for source in scope.in_edges() {
            let out_degree = scope.out_degree(source)?.max(1) as f64;
            let rank = if source == me {
                scope.with_data(|r| *r)
            } else {
                scope.with_neighbor(source, |r| *r)?
            };
            sum += rank / out_degree;
        }

        let rank = (1.0 - self.damping) / n + self.damping * sum;
        let previous = scope.with_data_mut(|r| std::mem::replace(r, rank));
        let delta = (rank - previous).abs();
        if delta > self.tolerance {
            for target in scope.out_edges() {
                scope.schedule(target, delta)?;
            }
        }
        Ok(())
    }
}
