use ann_engine::{AnnIndex, TOP_K};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== ANN Engine Demo ===");

    // Two well-separated 2D clusters
    let base = vec![
        0.0, 0.0, // ID 0
        0.1, 0.1, // ID 1
        0.0, 0.2, // ID 2
        10.0, 10.0, // ID 3
        10.1, 10.1, // ID 4
    ];

    println!("\n[1] Building index over {} vectors...", base.len() / 2);
    let index = AnnIndex::build(2, base)?;
    println!("    Done. N={}, D={}", index.len(), index.dimension());

    println!("\n[2] Searching...");
    for query in [[0.05f32, 0.05], [10.05, 10.05]] {
        let mut out = [0i32; TOP_K];
        index.search(&query, &mut out);
        println!("    Query {:?} -> nearest ids {:?}", query, &out[..5]);
    }

    println!("\n=== Demo Complete ===");
    Ok(())
}
