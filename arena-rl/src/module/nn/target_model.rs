use std::{any::Any, collections::HashMap, marker::PhantomData};

use burn::{
    module::{ModuleMapper, ModuleVisitor, ParamId},
    prelude::*,
};

/// An online network paired with a slowly tracking copy.
#[derive(Module, Debug)]
pub struct TargetNetwork<B: Backend, M: Module<B>> {
    pub online: M,
    pub target: M,
    backend: PhantomData<B>,
}

/// Collects the online parameters, then blends them into the target's.
struct Polyak<B: Backend> {
    online: HashMap<ParamId, Box<dyn Any + Send>>,
    tau: f64,
    backend: PhantomData<B>,
}

impl<B: Backend> ModuleVisitor<B> for Polyak<B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, tensor: &Tensor<B, D>) {
        self.online.insert(id, Box::new(tensor.clone()));
    }
}

impl<B: Backend> ModuleMapper<B> for Polyak<B> {
    fn map_float<const D: usize>(&mut self, id: ParamId, tensor: Tensor<B, D>) -> Tensor<B, D> {
        match self
            .online
            .remove(&id)
            .and_then(|online| online.downcast::<Tensor<B, D>>().ok())
        {
            Some(online) => (tensor * (1.0 - self.tau) + *online * self.tau).detach(),
            None => tensor,
        }
    }
}

impl<B: Backend, M: Module<B>> TargetNetwork<B, M> {
    pub fn new(online: M) -> Self {
        let target = online.clone();
        Self {
            online,
            target,
            backend: PhantomData,
        }
    }

    /// `target <- tau * online + (1 - tau) * target`
    pub fn soft_update(self, tau: f64) -> Self {
        let mut polyak = Polyak::<B> {
            online: HashMap::new(),
            tau: tau.clamp(0.0, 1.0),
            backend: PhantomData,
        };
        self.online.visit(&mut polyak);
        let target = self.target.map(&mut polyak);
        Self {
            online: self.online,
            target,
            backend: PhantomData,
        }
    }

    pub fn hard_update(self) -> Self {
        Self::new(self.online)
    }
}
