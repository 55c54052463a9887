use arbor_xpath::compiler::{CompileEnv, ModuleRegistry, StaticContext, compile_main};
use arbor_xpath::engine::functions::default_function_signatures;
use arbor_xpath::parser::{Language, parse};

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: print_ir <query>");
        std::process::exit(2);
    }
    let src = &args[1];
    let modules = ModuleRegistry::new();
    let env = CompileEnv { modules: &modules, module_imports: &[], external_variables: &[] };
    let compiled = parse(src, Language::XQueryUpdate31)
        .and_then(|module| compile_main(&module, StaticContext::new(default_function_signatures()), env));
    match compiled {
        Ok(c) => {
            println!("updating: {}", c.is_updating());
            println!("bucket: {:?}", c.expression.bucket());
            println!("{:#?}", c.expression);
        }
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
