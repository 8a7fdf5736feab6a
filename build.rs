// Build script to compile the cube's GLSL shaders to SPIR-V
//
// The binaries are loaded by name at runtime from `shaders/`, so a missing
// glslc only warns here and the failure surfaces when the app starts.

use std::path::Path;
use std::process::Command;

const SHADERS: &[(&str, &str)] = &[
    ("shaders/cube.vert", "shaders/cube.vert.spv"),
    ("shaders/cube.frag", "shaders/cube.frag.spv"),
];

fn main() {
    println!("cargo:rerun-if-changed=shaders/cube.vert");
    println!("cargo:rerun-if-changed=shaders/cube.frag");

    for (input, output) in SHADERS {
        compile_shader(input, output);
    }
}

fn compile_shader(input: &str, output: &str) {
    let input_path = Path::new(input);
    let output_path = Path::new(output);

    let result = Command::new("glslc")
        .arg(input_path)
        .arg("-o")
        .arg(output_path)
        .status();

    match result {
        Ok(status) if status.success() => {}
        Ok(status) => {
            panic!("Failed to compile {}: exit code {:?}", input, status.code());
        }
        Err(e) => {
            println!("cargo:warning=glslc not found ({}), {} was not compiled", e, input);
            println!("cargo:warning=compile manually: glslc {} -o {}", input, output);
        }
    }
}
