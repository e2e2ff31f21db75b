use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{check_action_count, Action, ActionSpace, MultiAgentEnv, Observation, StepInfo, StepResult};
use crate::error::EnvError;

const AGENT_SIZE: f32 = 0.15;
const DT: f32 = 0.1;
const DAMPING: f32 = 0.25;
const SENSITIVITY: f32 = 5.0;
const CONTACT_FORCE: f32 = 1e2;
const CONTACT_MARGIN: f32 = 1e-3;
/// Width of the (always silent) communication state each agent exposes.
const COMM_DIM: usize = 2;
const LOCAL_RATIO: f32 = 0.5;
const NUM_MOVES: usize = 5;

type Vec2 = [f32; 2];

/// Cooperative navigation: N agents must cover N landmarks while avoiding
/// collisions with each other.
///
/// Actions: 0 no-op, 1 move -x, 2 move +x, 3 move -y, 4 move +y.
/// Observation layout per agent:
/// ```text
/// [vel(2), pos(2), landmark_rel(2N), other_agent_rel(2(N-1)), other_comm(2(N-1))]
/// ```
pub struct CooperativeNavigation {
    agents: Vec<String>,
    max_cycles: usize,
    action_space: ActionSpace,
    agent_pos: Vec<Vec2>,
    agent_vel: Vec<Vec2>,
    landmark_pos: Vec<Vec2>,
    cycle: usize,
    done: bool,
    rng: StdRng,
}

impl CooperativeNavigation {
    pub fn new(n_agents: usize, max_cycles: usize) -> Result<Self, EnvError> {
        if n_agents < 1 {
            return Err(EnvError::TooFewAgents {
                min: 1,
                got: n_agents,
            });
        }
        let mut env = CooperativeNavigation {
            agents: (0..n_agents).map(|i| format!("agent_{i}")).collect(),
            max_cycles,
            action_space: ActionSpace::Discrete { n: NUM_MOVES },
            agent_pos: vec![[0.0; 2]; n_agents],
            agent_vel: vec![[0.0; 2]; n_agents],
            landmark_pos: vec![[0.0; 2]; n_agents],
            cycle: 0,
            done: false,
            rng: StdRng::from_os_rng(),
        };
        env.scatter();
        Ok(env)
    }

    fn scatter(&mut self) {
        for p in self.agent_pos.iter_mut().chain(self.landmark_pos.iter_mut()) {
            *p = [
                self.rng.random_range(-1.0..1.0),
                self.rng.random_range(-1.0..1.0),
            ];
        }
        for v in &mut self.agent_vel {
            *v = [0.0; 2];
        }
    }

    fn n(&self) -> usize {
        self.agents.len()
    }

    fn observe(&self, i: usize) -> Observation {
        let mut obs = Vec::with_capacity(self.observation_dim());
        obs.extend_from_slice(&self.agent_vel[i]);
        obs.extend_from_slice(&self.agent_pos[i]);
        for lm in &self.landmark_pos {
            obs.push(lm[0] - self.agent_pos[i][0]);
            obs.push(lm[1] - self.agent_pos[i][1]);
        }
        for (j, other) in self.agent_pos.iter().enumerate() {
            if j != i {
                obs.push(other[0] - self.agent_pos[i][0]);
                obs.push(other[1] - self.agent_pos[i][1]);
            }
        }
        // Agents are silent, so their communication state stays zero.
        obs.extend(std::iter::repeat(0.0).take(COMM_DIM * (self.n() - 1)));
        obs
    }

    fn observe_all(&self) -> Vec<Observation> {
        (0..self.n()).map(|i| self.observe(i)).collect()
    }

    fn is_collision(&self, a: usize, b: usize) -> bool {
        distance(self.agent_pos[a], self.agent_pos[b]) < 2.0 * AGENT_SIZE
    }

    /// Soft contact force exerted on `a` by `b`.
    fn contact_force(&self, a: usize, b: usize) -> Vec2 {
        let delta = [
            self.agent_pos[a][0] - self.agent_pos[b][0],
            self.agent_pos[a][1] - self.agent_pos[b][1],
        ];
        let dist = (delta[0] * delta[0] + delta[1] * delta[1]).sqrt();
        let dist_min = 2.0 * AGENT_SIZE;
        if dist <= f32::EPSILON {
            return [0.0; 2];
        }
        let k = CONTACT_MARGIN;
        let penetration = softplus(-(dist - dist_min) / k) * k;
        let scale = CONTACT_FORCE * penetration / dist;
        [delta[0] * scale, delta[1] * scale]
    }

    fn rewards(&self) -> Vec<f32> {
        let global: f32 = -self
            .landmark_pos
            .iter()
            .map(|&lm| {
                self.agent_pos
                    .iter()
                    .map(|&p| distance(p, lm))
                    .fold(f32::INFINITY, f32::min)
            })
            .sum::<f32>();

        (0..self.n())
            .map(|i| {
                let local = -((0..self.n())
                    .filter(|&j| j != i && self.is_collision(i, j))
                    .count() as f32);
                global * (1.0 - LOCAL_RATIO) + local * LOCAL_RATIO
            })
            .collect()
    }
}

impl MultiAgentEnv for CooperativeNavigation {
    fn agents(&self) -> &[String] {
        &self.agents
    }

    fn observation_dim(&self) -> usize {
        let n = self.n();
        4 + 2 * n + 2 * (n - 1) + COMM_DIM * (n - 1)
    }

    fn action_space(&self) -> &ActionSpace {
        &self.action_space
    }

    fn seed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    fn reset(&mut self) -> Vec<Observation> {
        self.scatter();
        self.cycle = 0;
        self.done = false;
        self.observe_all()
    }

    fn step(&mut self, actions: &[Action]) -> Result<StepResult, EnvError> {
        if self.done {
            return Err(EnvError::EpisodeOver);
        }
        check_action_count(self.n(), actions)?;

        let mut forces = vec![[0.0f32; 2]; self.n()];
        for (i, action) in actions.iter().enumerate() {
            let move_idx = match action {
                Action::Discrete(a) if *a < NUM_MOVES => *a,
                other => {
                    return Err(EnvError::InvalidAction {
                        agent: self.agents[i].clone(),
                        reason: format!("expected a move in 0..{NUM_MOVES}, got {other:?}"),
                    })
                }
            };
            let u = match move_idx {
                1 => [-1.0, 0.0],
                2 => [1.0, 0.0],
                3 => [0.0, -1.0],
                4 => [0.0, 1.0],
                _ => [0.0, 0.0],
            };
            forces[i] = [u[0] * SENSITIVITY, u[1] * SENSITIVITY];
        }

        for a in 0..self.n() {
            for b in (a + 1)..self.n() {
                let f = self.contact_force(a, b);
                forces[a][0] += f[0];
                forces[a][1] += f[1];
                forces[b][0] -= f[0];
                forces[b][1] -= f[1];
            }
        }

        for i in 0..self.n() {
            for d in 0..2 {
                self.agent_vel[i][d] = self.agent_vel[i][d] * (1.0 - DAMPING) + forces[i][d] * DT;
                self.agent_pos[i][d] += self.agent_vel[i][d] * DT;
            }
        }

        self.cycle += 1;
        let truncated = self.cycle >= self.max_cycles;
        self.done = truncated;

        Ok(StepResult {
            observations: self.observe_all(),
            rewards: self.rewards(),
            terminals: vec![truncated; self.n()],
            info: StepInfo {
                cycle: self.cycle,
                truncated,
            },
        })
    }
}

fn distance(a: Vec2, b: Vec2) -> f32 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt()
}

/// ln(1 + e^x) without overflow for large x.
fn softplus(x: f32) -> f32 {
    x.max(0.0) + (-x.abs()).exp().ln_1p()
}
