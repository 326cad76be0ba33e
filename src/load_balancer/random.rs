//! Uniform random selection.

use rand::Rng;

use crate::discovery::ServiceInstance;
use crate::load_balancer::LoadBalancer;

#[derive(Debug, Default, Clone, Copy)]
pub struct RandomPick;

impl LoadBalancer for RandomPick {
    fn pick<'a>(
        &self,
        _service: &str,
        instances: &'a [ServiceInstance],
    ) -> Option<&'a ServiceInstance> {
        if instances.is_empty() {
            return None;
        }
        let index = rand::thread_rng().gen_range(0..instances.len());
        instances.get(index)
    }
}
