//! Generational genetic algorithm over configuration documents.

use crate::config::{AgentConfig, ConfigStore};
use crate::evolution::fitness::{fitness, FitnessInput};
use crate::evolution::operators::{apply_mutation, crossover, draw_kinds, seed_variant};
use crate::metrics::AgentMetrics;
use anyhow::Result;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// Elite individuals retained for history reporting. Oldest drop first.
const ARCHIVE_CAP: usize = 200;

/// One candidate configuration plus its fitness and lineage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Individual {
    pub id: String,
    pub config: AgentConfig,
    pub fitness: f64,
    pub generation: u32,
    pub parent_ids: Vec<String>,
    /// Stable operator kind names applied when this individual was bred.
    pub mutations: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Individual {
    fn new(config: AgentConfig, generation: u32, parent_ids: Vec<String>, mutations: Vec<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            config,
            fitness: 0.0,
            generation,
            parent_ids,
            mutations,
            created_at: Utc::now(),
        }
    }
}

/// Tunables for the generational loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionParams {
    pub population_size: usize,
    /// Chance of each extra mutation beyond the guaranteed first (max 3 total).
    pub mutation_rate: f64,
    pub crossover_rate: f64,
    pub elite_count: usize,
    pub max_generations: u32,
    pub tournament_size: usize,
}

impl Default for EvolutionParams {
    fn default() -> Self {
        Self {
            population_size: 10,
            mutation_rate: 0.3,
            crossover_rate: 0.5,
            elite_count: 2,
            max_generations: 50,
            tournament_size: 3,
        }
    }
}

/// Convergence diagnostics for one archived generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationStats {
    pub generation: u32,
    pub best_fitness: f64,
    pub mean_fitness: f64,
    /// Standard deviation of the archived elites' fitness.
    pub diversity: f64,
}

/// Population-based optimizer. `initialize` then repeated `evolve`;
/// the best individual seen is tracked monotonically for the engine's
/// lifetime.
pub struct EvolutionaryEngine {
    params: EvolutionParams,
    population: Vec<Individual>,
    generation: u32,
    best: Option<Individual>,
    archive: VecDeque<Individual>,
}

impl EvolutionaryEngine {
    pub fn new(params: EvolutionParams) -> Self {
        Self {
            params,
            population: Vec::new(),
            generation: 0,
            best: None,
            archive: VecDeque::new(),
        }
    }

    pub fn params(&self) -> &EvolutionParams {
        &self.params
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn population_len(&self) -> usize {
        self.population.len()
    }

    pub fn best(&self) -> Option<&Individual> {
        self.best.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        !self.population.is_empty()
    }

    /// Build the starting population from deep copies of the seed, each
    /// with one cheap perturbation cycling through three variants so the
    /// population starts diverse without a fitness evaluation.
    pub fn initialize(&mut self, seed: &AgentConfig) {
        let mut rng = rand::thread_rng();
        self.population = (0..self.params.population_size)
            .map(|i| {
                let mut config = seed.clone();
                seed_variant(i, &mut config, &mut rng);
                Individual::new(config, 0, Vec::new(), Vec::new())
            })
            .collect();
        self.generation = 0;
        self.best = None;
        self.archive.clear();
        tracing::debug!(population = self.population.len(), "Population initialized");
    }

    /// Advance one generation and return the best individual seen so far.
    ///
    /// At `max_generations` the current best is returned without breeding
    /// a replacement population.
    pub fn evolve(&mut self, base: &AgentMetrics) -> Result<Individual> {
        if self.population.is_empty() {
            anyhow::bail!("population not initialized; call initialize first");
        }
        // At the cap the engine is frozen: no re-evaluation, no
        // re-archiving, the population stays byte-for-byte as bred.
        if self.generation >= self.params.max_generations {
            tracing::debug!(generation = self.generation, "Max generations reached");
            return self
                .best
                .clone()
                .ok_or_else(|| anyhow::anyhow!("no best individual yet; generation cap is zero"));
        }
        let mut rng = rand::thread_rng();

        // Evaluate: the shared metrics snapshot, jittered per individual
        // to simulate per-candidate variation.
        for individual in &mut self.population {
            let input = jitter(FitnessInput::from(base), &mut rng);
            individual.fitness = fitness(&input);
        }
        self.population
            .sort_by(|a, b| b.fitness.total_cmp(&a.fitness));

        // Track the running best; only a strict improvement replaces it.
        if let Some(top) = self.population.first() {
            let improved = self.best.as_ref().map_or(true, |b| top.fitness > b.fitness);
            if improved {
                self.best = Some(top.clone());
            }
        }

        // Archive this generation's elites for history reporting.
        for elite in self.population.iter().take(self.params.elite_count) {
            self.archive.push_back(elite.clone());
        }
        while self.archive.len() > ARCHIVE_CAP {
            self.archive.pop_front();
        }

        let best = self
            .best
            .clone()
            .ok_or_else(|| anyhow::anyhow!("evaluation produced no best individual"))?;

        let next_gen = self.generation + 1;
        let mut next: Vec<Individual> = Vec::with_capacity(self.params.population_size);

        // Elites survive verbatim: fresh ids, same document.
        for elite in self.population.iter().take(self.params.elite_count) {
            let mut survivor = Individual::new(
                elite.config.clone(),
                next_gen,
                vec![elite.id.clone()],
                Vec::new(),
            );
            survivor.fitness = elite.fitness;
            next.push(survivor);
        }

        while next.len() < self.params.population_size {
            let (mut config, parent_ids) = if rng.gen_bool(self.params.crossover_rate) {
                let p1 = self.tournament_select(&mut rng);
                let p2 = self.tournament_select(&mut rng);
                (
                    crossover(&p1.config, &p2.config),
                    vec![p1.id.clone(), p2.id.clone()],
                )
            } else {
                let p = self.tournament_select(&mut rng);
                (p.config.clone(), vec![p.id.clone()])
            };

            // 1 guaranteed mutation, up to 2 extra, kinds never repeated.
            let mut count = 1;
            for _ in 0..2 {
                if rng.gen_bool(self.params.mutation_rate) {
                    count += 1;
                }
            }
            let mut applied = Vec::new();
            for kind in draw_kinds(count, &mut rng) {
                if apply_mutation(kind, &mut config, &mut rng) {
                    applied.push(kind.as_str().to_string());
                }
            }

            next.push(Individual::new(config, next_gen, parent_ids, applied));
        }

        self.population = next;
        self.generation = next_gen;
        Ok(best)
    }

    /// Fittest of `tournament_size` randomly sampled distinct individuals.
    fn tournament_select<R: Rng>(&self, rng: &mut R) -> &Individual {
        let len = self.population.len();
        let sample = self.params.tournament_size.max(1).min(len);
        let mut picked: Vec<usize> = Vec::with_capacity(sample);
        while picked.len() < sample {
            let idx = rng.gen_range(0..len);
            if !picked.contains(&idx) {
                picked.push(idx);
            }
        }
        picked
            .into_iter()
            .map(|idx| &self.population[idx])
            .max_by(|a, b| a.fitness.total_cmp(&b.fitness))
            .expect("tournament sample is never empty")
    }

    /// Per-generation best/mean/stddev over the archived elites.
    pub fn evolution_history(&self) -> Vec<GenerationStats> {
        let mut by_generation: BTreeMap<u32, Vec<f64>> = BTreeMap::new();
        for elite in &self.archive {
            by_generation
                .entry(elite.generation)
                .or_default()
                .push(elite.fitness);
        }

        by_generation
            .into_iter()
            .map(|(generation, scores)| {
                let n = scores.len() as f64;
                let best_fitness = scores.iter().copied().fold(f64::MIN, f64::max);
                let mean_fitness = scores.iter().sum::<f64>() / n;
                let variance = scores
                    .iter()
                    .map(|s| (s - mean_fitness).powi(2))
                    .sum::<f64>()
                    / n;
                GenerationStats {
                    generation,
                    best_fitness,
                    mean_fitness,
                    diversity: variance.sqrt(),
                }
            })
            .collect()
    }

    /// Persist the best individual's document to `models.json`.
    /// Fails loudly when nothing has been evaluated yet.
    pub fn save_best_config(&self, store: &ConfigStore) -> Result<()> {
        let best = self
            .best
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("no best individual yet; run evolve first"))?;
        store.write_models(&best.config)?;
        tracing::info!(fitness = best.fitness, "Saved best configuration");
        Ok(())
    }
}

/// Per-individual variation around the shared metrics snapshot.
fn jitter<R: Rng>(mut input: FitnessInput, rng: &mut R) -> FitnessInput {
    let factor = |rng: &mut R| 1.0 + rng.gen_range(-0.1..=0.1);
    input.response_time = (input.response_time * factor(rng)).max(0.0);
    input.error_rate = (input.error_rate * factor(rng)).clamp(0.0, 1.0);
    input.memory_usage = (input.memory_usage * factor(rng)).clamp(0.0, 1.0);
    input.task_completion = (input.task_completion * factor(rng)).clamp(0.0, 1.0);
    input
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_metrics() -> AgentMetrics {
        AgentMetrics {
            avg_duration_ms: 120.0,
            error_rate: 0.1,
            task_completion_rate: 0.9,
            memory_pressure: 0.4,
        }
    }

    fn seeded_engine(params: EvolutionParams) -> EvolutionaryEngine {
        let mut seed = AgentConfig::default();
        seed.model.primary = Some("openrouter/auto".into());
        seed.model.fallbacks = Some(vec!["openrouter/auto".into(), "ollama/llama3.2".into()]);
        let mut engine = EvolutionaryEngine::new(params);
        engine.initialize(&seed);
        engine
    }

    #[test]
    fn test_evolve_requires_initialization() {
        let mut engine = EvolutionaryEngine::new(EvolutionParams::default());
        assert!(engine.evolve(&base_metrics()).is_err());
    }

    #[test]
    fn test_initialize_builds_full_population() {
        let engine = seeded_engine(EvolutionParams::default());
        assert_eq!(engine.population_len(), 10);
        assert_eq!(engine.generation(), 0);
        assert!(engine.best().is_none());
    }

    #[test]
    fn test_population_size_invariant() {
        let mut engine = seeded_engine(EvolutionParams::default());
        for _ in 0..5 {
            engine.evolve(&base_metrics()).unwrap();
            assert_eq!(engine.population_len(), 10);
        }
    }

    #[test]
    fn test_best_fitness_is_monotone() {
        let mut engine = seeded_engine(EvolutionParams::default());
        let mut previous = f64::MIN;
        for _ in 0..10 {
            let best = engine.evolve(&base_metrics()).unwrap();
            assert!(best.fitness >= previous);
            previous = best.fitness;
        }
    }

    #[test]
    fn test_max_generations_stops_breeding() {
        let params = EvolutionParams {
            max_generations: 1,
            ..Default::default()
        };
        let mut engine = seeded_engine(params);

        engine.evolve(&base_metrics()).unwrap();
        assert_eq!(engine.generation(), 1);

        // Second call hits the ceiling: best returned, population frozen
        // in place, fitness untouched.
        let before: Vec<(String, f64)> = engine
            .population
            .iter()
            .map(|i| (i.id.clone(), i.fitness))
            .collect();
        let best = engine.evolve(&base_metrics()).unwrap();
        assert_eq!(engine.generation(), 1);
        let after: Vec<(String, f64)> = engine
            .population
            .iter()
            .map(|i| (i.id.clone(), i.fitness))
            .collect();
        assert_eq!(before, after);
        assert_eq!(best.fitness, engine.best().unwrap().fitness);
    }

    #[test]
    fn test_at_cap_calls_do_not_duplicate_history() {
        let params = EvolutionParams {
            max_generations: 1,
            ..Default::default()
        };
        let mut engine = seeded_engine(params);

        for _ in 0..4 {
            engine.evolve(&base_metrics()).unwrap();
        }

        // Only the first call archived anything; the terminal generation's
        // elites appear exactly once.
        assert_eq!(engine.archive.len(), engine.params.elite_count);
        let history = engine.evolution_history();
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_elites_carry_lineage() {
        let mut engine = seeded_engine(EvolutionParams::default());
        engine.evolve(&base_metrics()).unwrap();
        let elites = &engine.population[..engine.params.elite_count];
        for elite in elites {
            assert_eq!(elite.parent_ids.len(), 1);
            assert!(elite.mutations.is_empty());
        }
    }

    #[test]
    fn test_offspring_mutation_count_bounded() {
        let mut engine = seeded_engine(EvolutionParams::default());
        for _ in 0..3 {
            engine.evolve(&base_metrics()).unwrap();
        }
        for individual in &engine.population {
            assert!(individual.mutations.len() <= 3);
        }
    }

    #[test]
    fn test_history_reports_each_generation() {
        let mut engine = seeded_engine(EvolutionParams::default());
        for _ in 0..4 {
            engine.evolve(&base_metrics()).unwrap();
        }
        let history = engine.evolution_history();
        assert_eq!(history.len(), 4);
        for stats in &history {
            assert!(stats.best_fitness >= stats.mean_fitness);
            assert!(stats.diversity >= 0.0);
        }
    }

    #[test]
    fn test_save_best_requires_evolution() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = ConfigStore::at(dir.path()).unwrap();
        let engine = seeded_engine(EvolutionParams::default());
        assert!(engine.save_best_config(&store).is_err());
    }

    #[test]
    fn test_save_best_writes_models_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = ConfigStore::at(dir.path()).unwrap();
        let mut engine = seeded_engine(EvolutionParams::default());
        engine.evolve(&base_metrics()).unwrap();
        engine.save_best_config(&store).unwrap();
        assert!(store.models_path().exists());
    }
}
