use burn::module::Param;
use burn::prelude::*;
use rand::rngs::StdRng;
use rand::Rng;

/// Fully connected layer whose weights are drawn from a caller-supplied RNG
/// (uniform in ±1/√fan_in), so the whole model is reproducible from one seed.
#[derive(Module, Debug)]
pub struct SeededLinear<B: Backend> {
    /// `[d_input, d_output]`
    weight: Param<Tensor<B, 2>>,
    bias: Param<Tensor<B, 1>>,
}

impl<B: Backend> SeededLinear<B> {
    pub fn new(d_input: usize, d_output: usize, rng: &mut StdRng, device: &B::Device) -> Self {
        let bound = 1.0 / (d_input.max(1) as f32).sqrt();
        let mut draw = |len: usize| -> Vec<f32> {
            (0..len).map(|_| rng.random_range(-bound..bound)).collect()
        };
        let weight = draw(d_input * d_output);
        let bias = draw(d_output);
        SeededLinear {
            weight: Param::from_tensor(Tensor::from_data(
                TensorData::new(weight, [d_input, d_output]),
                device,
            )),
            bias: Param::from_tensor(Tensor::from_data(TensorData::new(bias, [d_output]), device)),
        }
    }

    /// `[batch, d_input] -> [batch, d_output]`
    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        input.matmul(self.weight.val()) + self.bias.val().unsqueeze_dim(0)
    }
}

/// Stack of linear layers with tanh between them. The output layer is linear.
#[derive(Module, Debug)]
pub struct Mlp<B: Backend> {
    layers: Vec<SeededLinear<B>>,
}

impl<B: Backend> Mlp<B> {
    pub fn new(
        d_input: usize,
        hidden: &[usize],
        d_output: usize,
        rng: &mut StdRng,
        device: &B::Device,
    ) -> Self {
        let mut widths = Vec::with_capacity(hidden.len() + 2);
        widths.push(d_input);
        widths.extend_from_slice(hidden);
        widths.push(d_output);
        let layers = widths
            .windows(2)
            .map(|w| SeededLinear::new(w[0], w[1], rng, device))
            .collect();
        Mlp { layers }
    }

    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let last = self.layers.len().saturating_sub(1);
        let mut x = input;
        for (i, layer) in self.layers.iter().enumerate() {
            x = layer.forward(x);
            if i < last {
                x = x.tanh();
            }
        }
        x
    }
}

/// Per-agent policy: actor head (logits or pre-tanh mean) and critic head.
#[derive(Module, Debug)]
pub struct ActorCritic<B: Backend> {
    actor: Mlp<B>,
    critic: Mlp<B>,
}

impl<B: Backend> ActorCritic<B> {
    /// `[batch, obs_dim + meslen] -> (actor output [batch, action_dim], value [batch, 1])`
    pub fn forward(&self, input: Tensor<B, 2>) -> (Tensor<B, 2>, Tensor<B, 2>) {
        (self.actor.forward(input.clone()), self.critic.forward(input))
    }
}

/// Layer widths needed to rebuild a [`HammerModel`].
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDims {
    pub n_agents: usize,
    pub obs_dim: usize,
    pub action_dim: usize,
    pub meslen: usize,
    pub actor_layer: Vec<usize>,
    pub critic_layer: Vec<usize>,
    pub shared_params: bool,
}

impl ModelDims {
    pub fn num_policies(&self) -> usize {
        if self.shared_params {
            1
        } else {
            self.n_agents
        }
    }

    /// Index of the policy agent `agent` acts with.
    pub fn policy_index(&self, agent: usize) -> usize {
        if self.shared_params {
            0
        } else {
            agent
        }
    }
}

/// The central messenger plus the agents' actor-critics.
///
/// ```text
/// messenger: [batch, n * obs_dim] -> actor_layer (tanh) -> [batch, n * meslen]
/// policy i:  [batch, obs_dim + meslen] -> actor_layer (tanh) -> [batch, action_dim]
///                                     -> critic_layer (tanh) -> [batch, 1]
/// ```
#[derive(Module, Debug)]
pub struct HammerModel<B: Backend> {
    messenger: Mlp<B>,
    policies: Vec<ActorCritic<B>>,
}

impl<B: Backend> HammerModel<B> {
    pub fn new(dims: &ModelDims, rng: &mut StdRng, device: &B::Device) -> Self {
        let messenger = Mlp::new(
            dims.n_agents * dims.obs_dim,
            &dims.actor_layer,
            dims.n_agents * dims.meslen,
            rng,
            device,
        );
        let policy_input = dims.obs_dim + dims.meslen;
        let policies = (0..dims.num_policies())
            .map(|_| ActorCritic {
                actor: Mlp::new(policy_input, &dims.actor_layer, dims.action_dim, rng, device),
                critic: Mlp::new(policy_input, &dims.critic_layer, 1, rng, device),
            })
            .collect();
        HammerModel {
            messenger,
            policies,
        }
    }

    /// Raw (pre-DRU) messages for a batch of joint observations.
    pub fn messages(&self, joint_obs: Tensor<B, 2>) -> Tensor<B, 2> {
        self.messenger.forward(joint_obs)
    }

    pub fn policy(&self, index: usize) -> &ActorCritic<B> {
        &self.policies[index]
    }

    pub fn num_policies(&self) -> usize {
        self.policies.len()
    }
}
