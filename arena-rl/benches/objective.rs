use arena_rl::{
    data::{rollout::Rollout, util::Transition},
    module::nn::{
        actor_critic::{ActorCritic, ActorCriticConfig},
        q_network::QNetworkConfig,
        target_model::TargetNetwork,
    },
    objective::{
        a2c::ActorCriticLossConfig,
        dqn::{DeepQNetworkLossConfig, TransitionBatch},
    },
};
use burn::{
    backend::{Autodiff, NdArray},
    nn::loss::Reduction,
    tensor::{backend::AutodiffBackend, Device, Distribution, Int, Tensor},
};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn arena_rollout(steps: usize, agents: usize) -> Rollout {
    let mut rollout = Rollout::new();
    for t in 0..steps {
        rollout
            .record(
                vec![vec![0.0; 8]; agents],
                vec![t % 4; agents],
                (0..agents).map(|a| ((t + a) % 3) as f32).collect(),
                vec![0.5; agents],
                (0..agents).map(|a| t > steps / 2 && a % 2 == 0).collect(),
            )
            .unwrap();
    }
    rollout
}

pub fn returns_benchmark(c: &mut Criterion) {
    let rollout = arena_rollout(500, 16);
    c.bench_function("returns 500x16", |b| {
        b.iter(|| {
            let returns = black_box(&rollout).returns(0.99);
            rollout.advantages(&returns)
        })
    });
}

fn a2c_step<B: AutodiffBackend>(model: &ActorCritic<B>, batch: usize, device: &Device<B>) {
    let loss = ActorCriticLossConfig::new().init();
    let observations = Tensor::random([batch, 8], Distribution::Default, device);
    let actions = Tensor::<B, 1, Int>::random([batch], Distribution::Uniform(0.0, 4.0), device);
    let advantages = Tensor::random([batch], Distribution::Default, device);
    let returns = Tensor::random([batch], Distribution::Default, device);
    let mask = Tensor::ones([batch], device);
    let (logits, values) = model.forward(observations);
    let out = loss.forward(logits, values, actions, advantages, returns, mask);
    out.total.backward();
}

pub fn a2c_benchmark(c: &mut Criterion) {
    type B = Autodiff<NdArray>;
    let device: &Device<B> = &Default::default();
    let model = ActorCriticConfig::new(8, vec![64, 64], 4).init::<B>(device).unwrap();
    c.bench_function("a2c loss ndarray", |b| b.iter(|| a2c_step(&model, 256, device)));
}

pub fn dqn_benchmark(c: &mut Criterion) {
    type B = Autodiff<NdArray>;
    let device: &Device<B> = &Default::default();
    let network = TargetNetwork::new(
        QNetworkConfig::new(4, vec![32, 32], 2)
            .with_dueling(true)
            .init::<B>(device)
            .unwrap(),
    );
    let loss = DeepQNetworkLossConfig::new().init().unwrap();
    let transitions: Vec<_> = (0..32)
        .map(|i| Transition {
            before: vec![i as f32 / 32.0; 4],
            action: i % 2,
            after: vec![(i + 1) as f32 / 32.0; 4],
            reward: 1.0,
            done: i % 10 == 0,
        })
        .collect();

    c.bench_function("dqn loss ndarray", |b| {
        b.iter(|| {
            let batch = TransitionBatch::from_transitions(&transitions, device).unwrap();
            loss.forward(&network, batch, Reduction::Mean).backward()
        })
    });
}

criterion_group!(benches, returns_benchmark, a2c_benchmark, dqn_benchmark);
criterion_main!(benches);
