mod helpers;

mod pool_tests;
