mod helpers;

mod source_tests;
