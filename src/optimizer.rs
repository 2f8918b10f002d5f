//! Genetic optimizer: evolves a population of feasible colorings via
//! tournament selection, single-point crossover, mutation, and elitism,
//! with repair after every genetic operation (spec.md §4.7).

#![allow(clippy::unwrap_used, clippy::expect_used)] // fitness is never NaN; population/tournament slices are never empty

use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, instrument};

use crate::calendar::Calendar;
use crate::colorer::{repair, CancelToken, DsaturColorer, WeekScope};
use crate::dispatcher;
use crate::error::{SchedulerError, SchedulerResult};
use crate::evaluator::{Evaluator, EvaluatorConfig};
use crate::graph::ConflictGraph;
use crate::model::{ClassId, Coloring, ScheduleConstraints, Slot};

/// Tunables for the genetic optimizer (spec.md §6, `OptimizerConfig`).
#[derive(Debug, Clone, Copy)]
pub struct OptimizerConfig {
    pub population_size: usize,
    pub generation_limit: u32,
    pub mutation_rate: f64,
    pub crossover_rate: f64,
    pub elitism_count: usize,
    pub tournament_size: usize,
    pub max_seconds: u64,
    /// Trailing-window size and minimum relative improvement for the
    /// fitness-plateau early stop (spec.md §4.7, "Termination").
    pub plateau_window: u32,
    pub plateau_min_improvement: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            population_size: 50,
            generation_limit: 200,
            mutation_rate: 0.1,
            crossover_rate: 0.8,
            elitism_count: 3,
            tournament_size: 5,
            max_seconds: 30,
            plateau_window: 10,
            plateau_min_improvement: 0.01,
        }
    }
}

/// Outcome metrics returned alongside the best chromosome (spec.md §6,
/// "Optimization metrics").
#[derive(Debug, Clone, Copy, Default)]
pub struct OptimizationMetrics {
    pub generations_run: u32,
    pub elapsed_ms: u64,
    pub improvement_count: u32,
    pub final_average_fitness: f64,
}

struct Chromosome {
    coloring: Coloring,
    fitness: f64,
    generation_born: u32,
}

/// Evolves a population of feasible colorings seeded from DSATUR.
pub struct GeneticOptimizer<'a> {
    graph: &'a ConflictGraph,
    constraints: &'a ScheduleConstraints,
    calendar: &'a Calendar,
    weeks: u32,
    eval_config: &'a EvaluatorConfig,
    config: OptimizerConfig,
}

impl<'a> GeneticOptimizer<'a> {
    pub fn new(
        graph: &'a ConflictGraph,
        constraints: &'a ScheduleConstraints,
        calendar: &'a Calendar,
        weeks: u32,
        eval_config: &'a EvaluatorConfig,
        config: OptimizerConfig,
    ) -> Self {
        Self { graph, constraints, calendar, weeks, eval_config, config }
    }

    /// Runs the full evolve loop seeded from `seed`, returning the
    /// highest-fitness chromosome ever observed plus run metrics.
    #[instrument(skip_all, fields(population = self.config.population_size, vertices = self.graph.len()))]
    pub fn optimize(
        &self,
        seed: Coloring,
        cancel: &CancelToken,
        rng_seed: u64,
    ) -> SchedulerResult<(Coloring, OptimizationMetrics)> {
        let started = Instant::now();
        let budget = Duration::from_secs(self.config.max_seconds);
        let mut rng = ChaCha8Rng::seed_from_u64(rng_seed);
        let evaluator = Evaluator::new(self.eval_config);
        let scope = WeekScope::new(self.calendar, self.weeks);

        let mut population = self.seed_population(&seed, &scope, &evaluator, &mut rng)?;
        population.sort_by(|a, b| b.fitness.partial_cmp(&a.fitness).unwrap());

        let mut best = clone_best(&population);
        let mut trailing_best: Vec<f64> = vec![best.fitness];
        let mut improvement_count = 0u32;
        let mut generations_run = 0u32;

        for generation in 1..=self.config.generation_limit {
            if cancel.is_cancelled() {
                return Err(SchedulerError::Cancelled);
            }
            if started.elapsed() >= budget {
                debug!(generation, "optimizer budget exceeded, returning best-seen");
                break;
            }

            let elites: Vec<Chromosome> =
                population.iter().take(self.config.elitism_count).map(clone_chromosome).collect();

            // Breed enough repaired offspring to fill the rest of the
            // generation, then fan the fitness evaluation out across a
            // rayon pool via the Parallel Dispatcher (spec.md §4.8) instead
            // of scoring each offspring as it's produced.
            let mut offspring: Vec<Coloring> = Vec::with_capacity(self.config.population_size);
            while elites.len() + offspring.len() < self.config.population_size {
                let parent_a = self.tournament_select(&population, &mut rng);
                let parent_b = self.tournament_select(&population, &mut rng);

                let (child_a, child_b) = if rng.gen::<f64>() < self.config.crossover_rate {
                    self.crossover(parent_a, parent_b, &mut rng)
                } else {
                    (parent_a.coloring.clone(), parent_b.coloring.clone())
                };

                for child in [child_a, child_b] {
                    if elites.len() + offspring.len() >= self.config.population_size {
                        break;
                    }
                    let mutated = self.mutate(child, &mut rng);
                    if let Ok(repaired) = repair(self.graph, self.constraints, &scope, mutated, &mut rng) {
                        offspring.push(repaired);
                    }
                }
            }

            let fitnesses = dispatcher::parallel_evaluate(&offspring, |coloring| {
                evaluator.evaluate(self.graph, coloring).total
            });

            let mut next_gen = elites;
            next_gen.extend(offspring.into_iter().zip(fitnesses).map(|(coloring, fitness)| {
                Chromosome { coloring, fitness, generation_born: generation }
            }));

            next_gen.sort_by(|a, b| b.fitness.partial_cmp(&a.fitness).unwrap());
            population = next_gen;
            generations_run = generation;

            if population[0].fitness > best.fitness {
                best = clone_best(&population);
                improvement_count += 1;
            }

            trailing_best.push(population[0].fitness);
            if trailing_best.len() as u32 > self.config.plateau_window {
                trailing_best.remove(0);
            }
            if trailing_best.len() as u32 == self.config.plateau_window {
                let oldest = trailing_best.first().copied().unwrap_or(0.0);
                let newest = trailing_best.last().copied().unwrap_or(0.0);
                let relative_gain = if oldest.abs() > f64::EPSILON {
                    (newest - oldest) / oldest.abs()
                } else {
                    newest
                };
                if relative_gain < self.config.plateau_min_improvement {
                    debug!(generation, relative_gain, "fitness plateau reached, stopping early");
                    break;
                }
            }
        }

        let final_average_fitness =
            population.iter().map(|c| c.fitness).sum::<f64>() / population.len().max(1) as f64;

        info!(
            generations_run,
            improvement_count,
            best_fitness = best.fitness,
            "genetic optimization complete"
        );

        Ok((
            best.coloring,
            OptimizationMetrics {
                generations_run,
                elapsed_ms: started.elapsed().as_millis() as u64,
                improvement_count,
                final_average_fitness,
            },
        ))
    }

    /// Seeds the population with one deterministic DSATUR result and
    /// `N-1` randomized DSATUR results; falls back to perturbations of the
    /// deterministic seed when randomized DSATUR can't fill the
    /// population (spec.md §4.7, "Initialization").
    fn seed_population(
        &self,
        seed: &Coloring,
        scope: &WeekScope,
        evaluator: &Evaluator,
        rng: &mut ChaCha8Rng,
    ) -> SchedulerResult<Vec<Chromosome>> {
        let mut population = Vec::with_capacity(self.config.population_size);
        population.push(Chromosome {
            coloring: seed.clone(),
            fitness: evaluator.evaluate(self.graph, seed).total,
            generation_born: 0,
        });

        while population.len() < self.config.population_size {
            let colorer = DsaturColorer::new(self.graph, self.constraints, WeekScope::new(self.calendar, self.weeks));
            match colorer.color_randomized(&CancelToken::new(), rng) {
                Ok(coloring) => {
                    let fitness = evaluator.evaluate(self.graph, &coloring).total;
                    population.push(Chromosome { coloring, fitness, generation_born: 0 });
                }
                Err(_) => {
                    // Fall back to a mutated perturbation of the
                    // deterministic seed.
                    let perturbed = self.mutate(seed.clone(), rng);
                    if let Ok(repaired) = repair(self.graph, self.constraints, scope, perturbed, rng) {
                        let fitness = evaluator.evaluate(self.graph, &repaired).total;
                        population.push(Chromosome { coloring: repaired, fitness, generation_born: 0 });
                    } else {
                        break;
                    }
                }
            }
        }
        Ok(population)
    }

    /// Tournament of size `k`: highest fitness wins, ties broken by newer
    /// generation (spec.md §4.7, "Selection").
    fn tournament_select<'c>(&self, population: &'c [Chromosome], rng: &mut ChaCha8Rng) -> &'c Chromosome {
        let k = self.config.tournament_size.min(population.len()).max(1);
        let mut best: Option<&Chromosome> = None;
        for _ in 0..k {
            let idx = rng.gen_range(0..population.len());
            let candidate = &population[idx];
            best = Some(match best {
                None => candidate,
                Some(current) => {
                    if candidate.fitness > current.fitness
                        || (candidate.fitness == current.fitness
                            && candidate.generation_born > current.generation_born)
                    {
                        candidate
                    } else {
                        current
                    }
                }
            });
        }
        best.expect("tournament size is at least 1")
    }

    /// Single-point crossover on the per-class color vector (spec.md §4.7,
    /// "Crossover"). Offspring are *not* repaired here; the caller repairs
    /// before evaluation.
    fn crossover(&self, a: &Chromosome, b: &Chromosome, rng: &mut ChaCha8Rng) -> (Coloring, Coloring) {
        let order = self.graph.order();
        if order.len() < 2 {
            return (a.coloring.clone(), b.coloring.clone());
        }
        let split = rng.gen_range(1..order.len());
        let mut child_a = Coloring::new();
        let mut child_b = Coloring::new();
        for (i, id) in order.iter().enumerate() {
            let (from_a, from_b) = if i < split {
                (a.coloring.assignments.get(id), b.coloring.assignments.get(id))
            } else {
                (b.coloring.assignments.get(id), a.coloring.assignments.get(id))
            };
            if let Some(slot) = from_a {
                child_a.assignments.insert(id.clone(), *slot);
            }
            if let Some(slot) = from_b {
                child_b.assignments.insert(id.clone(), *slot);
            }
        }
        (child_a, child_b)
    }

    /// For `ceil(rate * |V|)` randomly chosen vertices, nudge the period by
    /// `{-1, 0, +1}` clamped to the palette (spec.md §4.7, "Mutation").
    fn mutate(&self, mut coloring: Coloring, rng: &mut ChaCha8Rng) -> Coloring {
        let order = self.graph.order();
        if order.is_empty() {
            return coloring;
        }
        let count = ((self.config.mutation_rate * order.len() as f64).ceil() as usize).max(1);
        let chosen: Vec<&ClassId> = order.choose_multiple(rng, count.min(order.len())).collect();
        for id in chosen {
            let Some(current) = coloring.assignments.get(id).copied() else { continue };
            let delta: i8 = *[-1i8, 0, 1].choose(rng).unwrap();
            let new_period = (current.period as i16 + delta as i16).clamp(1, crate::model::P_MAX as i16) as u8;
            coloring.assignments.insert(id.clone(), Slot::new(current.weekday, new_period));
        }
        coloring
    }
}

fn clone_chromosome(c: &Chromosome) -> Chromosome {
    Chromosome { coloring: c.coloring.clone(), fitness: c.fitness, generation_born: c.generation_born }
}

fn clone_best(population: &[Chromosome]) -> Chromosome {
    clone_chromosome(&population[0])
}
