use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use refscout::search::{Deadline, StrategyKind, TermMatcher};
use refscout::IndexConfig;
use std::{fs::File, io::Write};
use tempfile::tempdir;

fn create_module_files(
    dir: &tempfile::TempDir,
    file_count: usize,
    lines_per_file: usize,
) -> std::io::Result<()> {
    std::fs::create_dir_all(dir.path().join("pkg"))?;
    for i in 0..file_count {
        let file_path = dir.path().join(format!("pkg/module_{}.py", i));
        let mut file = File::create(file_path)?;
        for j in 0..lines_per_file {
            writeln!(
                file,
                "from pkg.module_{} import value_{}  # line {}",
                (i + j) % file_count,
                j,
                j
            )?;
        }
    }
    Ok(())
}

fn sample_lines(count: usize) -> Vec<String> {
    (0..count)
        .map(|i| match i % 4 {
            0 => format!("import pkg.module_{} as m{}", i % 50, i),
            1 => format!("    result = compute(value_{}, other_{})", i, i + 1),
            2 => "    # nothing interesting on this line at all".to_string(),
            _ => format!("from pkg.sub.helpers_{} import thing", i % 7),
        })
        .collect()
}

fn bench_matcher_strategies(c: &mut Criterion) {
    let lines = sample_lines(5_000);
    let mut group = c.benchmark_group("Matcher Strategy");

    for term_count in [1, 3, 8, 32] {
        let terms: Vec<String> = (0..term_count)
            .map(|i| format!("pkg.module_{}", i))
            .collect();
        for kind in [StrategyKind::Literal, StrategyKind::Automaton] {
            let matcher = TermMatcher::with_strategy(terms.clone(), kind).unwrap();
            group.bench_with_input(
                BenchmarkId::new(format!("{:?}", kind), term_count),
                &lines,
                |b, lines| {
                    b.iter(|| black_box(matcher.find_lines(lines, &Deadline::unbounded())));
                },
            );
        }
    }
    group.finish();
}

fn bench_full_run(c: &mut Criterion) {
    let mut group = c.benchmark_group("Full Run");
    group.sample_size(10);

    for file_count in [10, 50, 200] {
        let dir = tempdir().unwrap();
        create_module_files(&dir, file_count, 40).unwrap();

        let mut config = IndexConfig::for_root(dir.path());
        config.scan_parameters.target_file_extensions = vec!["py".to_string()];
        config.reference_finding.patterns =
            vec!["{filename}".to_string(), "{module_name}".to_string()];
        config.logging.level = "warn".to_string();

        group.bench_with_input(
            BenchmarkId::from_parameter(file_count),
            &config,
            |b, config| {
                b.iter(|| black_box(refscout::run(config.clone()).unwrap()));
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_matcher_strategies, bench_full_run);
criterion_main!(benches);
