#[cfg(test)]
mod harness;
#[cfg(test)]
mod processor_tests;
