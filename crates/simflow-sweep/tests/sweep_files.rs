use serde_json::json;
use simflow_model::{CommandLine, Simulation, SimulationBuilder, Task};
use simflow_sweep::{
    load_sweep_file, CsvBuilder, Mutator, SweepFileOptions, ValueType, YamlBuilder,
};

const SCENARIO_CSV: &str = "a,b,c,d\n1,2,3,\n1,3,1,\n2,2,3,4\n2,2,2,5\n2,,3,6\n";

fn base_simulation() -> Simulation {
    let mut task = Task::new(CommandLine::new("python"));
    task.set_parameter("c", json!("c-value"));
    Simulation::new(task)
}

fn int_options() -> SweepFileOptions {
    ["a", "b", "c", "d"]
        .into_iter()
        .fold(SweepFileOptions::default(), |options, column| {
            options.with_type(column, ValueType::Int)
        })
}

#[test]
fn csv_rows_omit_empty_cells() {
    let builder = CsvBuilder::from_reader(SCENARIO_CSV.as_bytes(), &int_options()).expect("csv");
    assert_eq!(builder.count(), 5);
    let base = base_simulation();
    let sims: Vec<Simulation> = builder
        .simulations(&base)
        .collect::<Result<_, _>>()
        .expect("realize");
    assert_eq!(sims.len(), 5);

    assert_eq!(sims[0].task.parameter("a"), Some(&json!(1)));
    assert_eq!(sims[0].task.parameter("c"), Some(&json!(3)));
    assert!(sims[0].task.parameter("d").is_none());
    assert_eq!(sims[2].task.parameter("d"), Some(&json!(4)));

    let fifth = &sims[4];
    assert!(fifth.task.parameter("b").is_none());
    assert!(!fifth.task.parameters().contains_key("b"));
    assert!(!fifth.meta.tags.contains_key("b"));
    assert_eq!(fifth.task.parameter("d"), Some(&json!(6)));
}

#[test]
fn csv_cast_failures_are_invalid_specs() {
    let options = SweepFileOptions::default().with_type("a", ValueType::Int);
    let err = CsvBuilder::from_reader("a\nnot-a-number\n".as_bytes(), &options).expect_err("cast");
    assert_eq!(err.kind(), "InvalidSweepSpec");
    assert_eq!(err.info().context.get("column").map(String::as_str), Some("a"));
}

#[test]
fn ragged_csv_rows_name_the_row_and_column() {
    let err = CsvBuilder::from_reader("a,b,c\n1,2,3\n4,5\n".as_bytes(), &int_options()).expect_err("short row");
    assert_eq!(err.kind(), "InvalidSweepSpec");
    assert_eq!(err.info().code, "csv_row_width");
    let context = &err.info().context;
    assert_eq!(context.get("row").map(String::as_str), Some("1"));
    assert_eq!(context.get("column").map(String::as_str), Some("c"));
    assert_eq!(context.get("fields").map(String::as_str), Some("2"));

    let err = CsvBuilder::from_reader("a\n1\n2,3\n".as_bytes(), &int_options()).expect_err("long row");
    assert_eq!(err.info().code, "csv_row_width");
    assert_eq!(err.info().context.get("row").map(String::as_str), Some("1"));
}

#[test]
fn csv_mutator_failures_name_the_row_and_column() {
    let options = SweepFileOptions::default().with_mutator(
        "scale",
        Mutator::custom("scale", |_, value| {
            value.as_i64().ok_or("scale must be an integer")?;
            Ok(Default::default())
        }),
    );
    let builder = CsvBuilder::from_reader("name,scale\nx,1\ny,big\n".as_bytes(), &options).expect("csv");
    let base = base_simulation();
    let results: Vec<_> = builder.simulations(&base).collect();
    let err = results[1].as_ref().expect_err("mutator failed");
    assert_eq!(err.kind(), "SweepMutatorError");
    let context = &err.info().context;
    assert_eq!(context.get("row").map(String::as_str), Some("1"));
    assert_eq!(context.get("column").map(String::as_str), Some("scale"));
    assert!(!context.contains_key("definition_index"));
}

#[test]
fn untyped_csv_columns_are_inferred() {
    let builder =
        CsvBuilder::from_reader("n,x,flag,label\n3,0.5,true,run one\n".as_bytes(), &SweepFileOptions::default())
            .expect("csv");
    let row = &builder.rows()[0];
    assert_eq!(row["n"], json!(3));
    assert_eq!(row["x"], json!(0.5));
    assert_eq!(row["flag"], json!(true));
    assert_eq!(row["label"], json!("run one"));
}

#[test]
fn csv_columns_can_use_custom_mutators() {
    let options = SweepFileOptions::default().with_mutator(
        "scale",
        Mutator::custom("scale", |sim, value| {
            let doubled = value.as_i64().ok_or("scale must be an integer")? * 2;
            sim.task.set_parameter("scaled", json!(doubled));
            Ok(Default::default())
        }),
    );
    let builder = CsvBuilder::from_reader("scale\n4\n".as_bytes(), &options).expect("csv");
    let base = base_simulation();
    let sim = builder
        .simulations(&base)
        .next()
        .expect("one row")
        .expect("realize");
    assert_eq!(sim.task.parameter("scaled"), Some(&json!(8)));
    assert!(sim.task.parameter("scale").is_none());
}

#[test]
fn yaml_row_style_maps_one_simulation_per_entry() {
    let yaml = b"- a: 1\n  b: x\n- a: 2\n";
    let builder = YamlBuilder::from_slice(yaml, &SweepFileOptions::default()).expect("yaml");
    assert!(matches!(builder, YamlBuilder::Rows(_)));
    assert_eq!(builder.count(), 2);
    let base = base_simulation();
    let sims: Vec<Simulation> = builder
        .simulations(&base)
        .collect::<Result<_, _>>()
        .expect("realize");
    assert_eq!(sims[0].task.parameter("b"), Some(&json!("x")));
    assert!(sims[1].task.parameter("b").is_none());
}

#[test]
fn yaml_table_style_honours_mode() {
    let cross = YamlBuilder::from_slice(b"a: [1, 2]\nb: [3, 4, 5]\n", &SweepFileOptions::default())
        .expect("cross");
    assert_eq!(cross.count(), 6);

    let pair = YamlBuilder::from_slice(b"mode: pair\na: [1, 2]\nb: [3, 4]\n", &SweepFileOptions::default())
        .expect("pair");
    assert_eq!(pair.count(), 2);

    let scalar = YamlBuilder::from_slice(b"a: 7\nb: [1, 2]\n", &SweepFileOptions::default())
        .expect("scalar");
    assert_eq!(scalar.count(), 2);

    let err = YamlBuilder::from_slice(b"mode: pair\na: [1, 2]\nb: [3]\n", &SweepFileOptions::default())
        .expect_err("mismatch");
    assert_eq!(err.kind(), "InvalidSweepSpec");

    let err = YamlBuilder::from_slice(b"mode: zip\na: [1]\n", &SweepFileOptions::default())
        .expect_err("bad mode");
    assert_eq!(err.info().code, "yaml_mode");
}

#[test]
fn sweep_files_are_chosen_by_extension() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let csv_path = dir.path().join("sweep.csv");
    std::fs::write(&csv_path, SCENARIO_CSV).expect("write csv");
    let yaml_path = dir.path().join("sweep.yml");
    std::fs::write(&yaml_path, "a: [1, 2, 3]\n").expect("write yaml");
    let txt_path = dir.path().join("sweep.txt");
    std::fs::write(&txt_path, "a\n1\n").expect("write txt");

    let options = SweepFileOptions::default();
    assert_eq!(load_sweep_file(&csv_path, &options).expect("csv").count(), 5);
    assert_eq!(load_sweep_file(&yaml_path, &options).expect("yaml").count(), 3);
    assert!(load_sweep_file(&txt_path, &options).is_err());
    assert_eq!(
        load_sweep_file(&dir.path().join("absent.csv"), &options)
            .expect_err("missing")
            .kind(),
        "Io"
    );
}
