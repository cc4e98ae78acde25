use burn::{
    prelude::Backend,
    tensor::{Bool, Tensor},
};

/// `reward + discount * (1 - done) * next_value`
pub fn bootstrap_target<B: Backend>(
    reward: Tensor<B, 1>,
    next_value: Tensor<B, 1>,
    done: Tensor<B, 1, Bool>,
    discount_factor: f64,
) -> Tensor<B, 1> {
    let not_done = done.bool_not().float();
    reward + not_done * next_value * discount_factor
}

/// TD error `Q(s, a) - (reward + discount * (1 - done) * V(s'))`.
pub fn temporal_difference<B: Backend>(
    reward: Tensor<B, 1>,
    pred_value_given_action_before: Tensor<B, 1>,
    pred_value_after: Tensor<B, 1>,
    done: Tensor<B, 1, Bool>,
    discount_factor: f64,
) -> Tensor<B, 1> {
    pred_value_given_action_before - bootstrap_target(reward, pred_value_after, done, discount_factor)
}
