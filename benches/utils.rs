use modelgen::{MemoryModel, ObjectId};
use rand::{Rng, SeedableRng, rngs::StdRng};

/// Generate a random package of `n` classes to use in the benchmark
pub fn generate_random_model(n: usize) -> (MemoryModel, ObjectId) {
    let mut rng = StdRng::seed_from_u64(42); // Fixed seed for reproducibility
    let mut model = MemoryModel::new()
        .with_type("NamedElement", &[])
        .with_type("Package", &["NamedElement"])
        .with_type("Class", &["NamedElement"])
        .with_type("Attribute", &["NamedElement"]);

    let package = model.create("Package", None);
    model.set(package, "name", random_string(&mut rng, 5, 10));

    let mut classes = Vec::with_capacity(n);
    for _ in 0..n {
        let class = model.create("Class", Some(package));
        model.set(class, "name", random_string(&mut rng, 5, 10));
        model.set(class, "abstract", rng.random_bool(0.2));

        let attribute_count = rng.random_range(3..10);
        let mut attributes = Vec::with_capacity(attribute_count);
        for _ in 0..attribute_count {
            let attribute = model.create("Attribute", Some(class));
            model.set(attribute, "name", random_string(&mut rng, 3, 8));
            model.set(attribute, "size", rng.random_range(10_i64..1000));
            model.set(attribute, "optional", rng.random_bool(0.3));
            attributes.push(attribute);
        }
        model.set(class, "attributes", attributes);
        classes.push(class);
    }
    model.set(package, "classes", classes);

    (model, package)
}

/// Generate a random string with length between min and max
fn random_string(rng: &mut StdRng, min_len: usize, max_len: usize) -> String {
    let charset = "abcdefghijklmnopqrstuvwxyz";
    let len = rng.random_range(min_len..=max_len);

    (0..len)
        .map(|_| {
            let idx = rng.random_range(0..charset.len());
            charset.chars().nth(idx).unwrap()
        })
        .collect()
}

// Print binary size information - can be used from individual benchmarks
pub fn print_binary_size() {
    let binary_path = std::env::current_exe().unwrap();
    let metadata = std::fs::metadata(binary_path.clone()).unwrap();
    let size_bytes = metadata.len();
    let size_kb = size_bytes as f64 / 1024.0;
    let size_mb = size_kb / 1024.0;

    println!(
        "Binary size: {:.2} MB ({:.2} KB, {} bytes)",
        size_mb, size_kb, size_bytes
    );
    println!("Binary path: {}", binary_path.display());
}
